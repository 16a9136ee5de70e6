//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the session and calendar endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::ApiError;
use crate::web::auth::{
    LoginRequest, RefreshRequest, RegisterRequest, RegisterResponse, TokenResponse,
};
use crate::web::state::AppState;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use snore_core::dates::{parse_date, parse_timestamp};
use snore_core::domain::{
    Clip, ClipBounds, DaySummary, FinalizeOverrides, Session, SessionSnapshot,
};
use snore_core::engine::ClipUpload;
use snore_core::ports::{PortError, PortResult};
use std::sync::Arc;
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::auth::register_handler,
        crate::web::auth::login_handler,
        crate::web::auth::refresh_handler,
        create_session_handler,
        upload_clip_handler,
        finalize_session_handler,
        get_session_handler,
        list_sessions_handler,
        delete_session_handler,
        delete_clip_handler,
        calendar_summary_handler,
    ),
    components(
        schemas(
            RegisterRequest, LoginRequest, RefreshRequest, RegisterResponse, TokenResponse,
            CreateSessionRequest, CreateSessionResponse, ClipResponse, SessionResponse,
            SessionListItem, FinalizeRequest, DeleteResponse, DaySummaryResponse,
            UploadClipForm,
        )
    ),
    tags(
        (name = "Snore Tracking API", description = "Sleep sessions, snore clips and nightly reports.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, Default, ToSchema)]
#[serde(default)]
pub struct CreateSessionRequest {
    /// ISO-8601 timestamp; naive values are taken as UTC.
    pub started_at: Option<String>,
}

/// The response payload sent after successfully creating a session.
#[derive(Serialize, ToSchema)]
pub struct CreateSessionResponse {
    pub id: Uuid,
    pub status: String,
}

#[derive(Serialize, ToSchema)]
pub struct ClipResponse {
    pub id: Uuid,
    pub file_path: String,
    pub start_sec: f64,
    pub end_sec: f64,
    pub duration_sec: u32,
    pub confidence: Option<u8>,
}

impl From<Clip> for ClipResponse {
    fn from(clip: Clip) -> Self {
        Self {
            id: clip.id,
            file_path: clip.blob_ref,
            start_sec: clip.start_sec,
            end_sec: clip.end_sec,
            duration_sec: clip.duration_sec,
            confidence: clip.confidence,
        }
    }
}

/// Full session snapshot including its clips.
#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: Uuid,
    pub status: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub has_snore: bool,
    pub snore_count: u32,
    pub snore_total_sec: u32,
    pub advice: Option<String>,
    /// Hours.
    pub sleep_duration: Option<f64>,
    pub sleep_quality: Option<String>,
    pub clips: Vec<ClipResponse>,
}

impl From<SessionSnapshot> for SessionResponse {
    fn from(snapshot: SessionSnapshot) -> Self {
        let s = snapshot.session;
        Self {
            id: s.id,
            status: s.status.to_string(),
            started_at: format_ts(s.started_at),
            ended_at: format_ts(s.ended_at),
            has_snore: s.has_snore,
            snore_count: s.snore_count,
            snore_total_sec: s.snore_total_sec,
            advice: s.advice,
            sleep_duration: s.sleep_duration,
            sleep_quality: s.sleep_quality.map(|q| q.to_string()),
            clips: snapshot.clips.into_iter().map(ClipResponse::from).collect(),
        }
    }
}

/// List-view projection of a session, without status or clips.
#[derive(Serialize, ToSchema)]
pub struct SessionListItem {
    pub id: Uuid,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub has_snore: bool,
    pub snore_count: u32,
    pub snore_total_sec: u32,
    pub advice: Option<String>,
    pub sleep_duration: Option<f64>,
    pub sleep_quality: Option<String>,
}

impl From<Session> for SessionListItem {
    fn from(s: Session) -> Self {
        Self {
            id: s.id,
            started_at: format_ts(s.started_at),
            ended_at: format_ts(s.ended_at),
            has_snore: s.has_snore,
            snore_count: s.snore_count,
            snore_total_sec: s.snore_total_sec,
            advice: s.advice,
            sleep_duration: s.sleep_duration,
            sleep_quality: s.sleep_quality.map(|q| q.to_string()),
        }
    }
}

/// Values to pin at finalize time; omitted fields are derived.
#[derive(Deserialize, Default, ToSchema)]
#[serde(default)]
pub struct FinalizeRequest {
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub snore_count: Option<u32>,
    pub snore_total_sec: Option<u32>,
    pub advice: Option<String>,
    /// Hours, e.g. 7.5.
    pub sleep_duration: Option<f64>,
    /// One of excellent, good, fair, caution, poor.
    pub sleep_quality: Option<String>,
}

impl FinalizeRequest {
    fn into_overrides(self) -> PortResult<FinalizeOverrides> {
        Ok(FinalizeOverrides {
            started_at: self.started_at.as_deref().map(parse_timestamp).transpose()?,
            ended_at: self.ended_at.as_deref().map(parse_timestamp).transpose()?,
            snore_count: self.snore_count,
            snore_total_sec: self.snore_total_sec,
            sleep_duration: self.sleep_duration,
            sleep_quality: self.sleep_quality.as_deref().map(str::parse).transpose()?,
            advice: self.advice,
        })
    }
}

#[derive(Serialize, ToSchema)]
pub struct DeleteResponse {
    pub ok: bool,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct DaySummaryResponse {
    /// `YYYY-MM-DD`
    pub date: String,
    pub snore: bool,
    pub count: u64,
    pub total_sec: u64,
}

impl From<DaySummary> for DaySummaryResponse {
    fn from(day: DaySummary) -> Self {
        Self {
            date: day.date.format("%Y-%m-%d").to_string(),
            snore: day.snore,
            count: day.count,
            total_sec: day.total_sec,
        }
    }
}

/// Documents the multipart form accepted by the clip upload endpoint.
#[derive(ToSchema)]
pub struct UploadClipForm {
    pub start_sec: f64,
    pub end_sec: f64,
    pub confidence: Option<i64>,
    /// Audio file; `.wav`, `.m4a` or `.mp3`.
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListSessionsQuery {
    /// `YYYY-MM-DD`
    pub date: String,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SummaryQuery {
    /// First day of the range, `YYYY-MM-DD`.
    #[serde(rename = "from")]
    pub date_from: String,
    /// Last day of the range (inclusive), `YYYY-MM-DD`.
    #[serde(rename = "to")]
    pub date_to: String,
}

fn format_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

//=========================================================================================
// Health
//=========================================================================================

pub async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

//=========================================================================================
// Session Handlers
//=========================================================================================

/// Open a new sleep session.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body(content = CreateSessionRequest, description = "May be omitted entirely."),
    responses(
        (status = 201, description = "Session created", body = CreateSessionResponse),
        (status = 400, description = "Malformed payload or started_at"),
        (status = 401, description = "Missing or invalid bearer token")
    )
)]
pub async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    // The body is optional; an empty one opens a session without a start time.
    let req: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid session payload: {}", e)))?
    };
    let started_at = req.started_at.as_deref().map(parse_timestamp).transpose()?;
    let session = state.engine.create_session(user_id, started_at).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            id: session.id,
            status: session.status.to_string(),
        }),
    ))
}

/// Upload one detected snore clip to an open session.
///
/// Accepts a multipart/form-data request with `start_sec`, `end_sec`, an optional
/// `confidence` and a `file` part.
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/clips/upload",
    request_body(content = UploadClipForm, content_type = "multipart/form-data"),
    params(("session_id" = Uuid, Path, description = "Session to append to")),
    responses(
        (status = 200, description = "Clip recorded", body = ClipResponse),
        (status = 400, description = "Bad bounds or unsupported audio format"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session already finalized")
    )
)]
pub async fn upload_clip_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(session_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<ClipResponse>, ApiError> {
    let mut start_sec: Option<f64> = None;
    let mut end_sec: Option<f64> = None;
    let mut confidence: Option<i64> = None;
    let mut upload: Option<ClipUpload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read multipart data: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data: Bytes = field.bytes().await.map_err(|e| {
                    ApiError::BadRequest(format!("Failed to read file bytes: {}", e))
                })?;
                upload = Some(ClipUpload { file_name, data });
            }
            "start_sec" | "end_sec" | "confidence" => {
                let text = field.text().await.map_err(|e| {
                    ApiError::BadRequest(format!("Failed to read field {}: {}", name, e))
                })?;
                let text = text.trim();
                match name.as_str() {
                    "start_sec" => start_sec = Some(parse_number(&name, text)?),
                    "end_sec" => end_sec = Some(parse_number(&name, text)?),
                    _ if text.is_empty() => confidence = None,
                    _ => confidence = Some(parse_number(&name, text)?),
                }
            }
            _ => {}
        }
    }

    let bounds = ClipBounds {
        start_sec: start_sec.ok_or_else(|| missing("start_sec"))?,
        end_sec: end_sec.ok_or_else(|| missing("end_sec"))?,
        confidence,
    };
    let upload = upload.ok_or_else(|| missing("file"))?;

    let clip = state
        .engine
        .append_clip(session_id, user_id, bounds, upload)
        .await?;
    Ok(Json(clip.into()))
}

/// Finalize a session into its nightly report.
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/finalize",
    request_body = FinalizeRequest,
    params(("session_id" = Uuid, Path, description = "Session to finalize")),
    responses(
        (status = 200, description = "Session finalized", body = SessionResponse),
        (status = 400, description = "Malformed override"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session already finalized")
    )
)]
pub async fn finalize_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<FinalizeRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let overrides = req.into_overrides()?;
    let snapshot = state.engine.finalize(session_id, user_id, overrides).await?;
    Ok(Json(snapshot.into()))
}

/// Fetch a session with all of its clips.
#[utoipa::path(
    get,
    path = "/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "Session to fetch")),
    responses(
        (status = 200, description = "Session snapshot", body = SessionResponse),
        (status = 404, description = "Session not found")
    )
)]
pub async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let snapshot = state.engine.get_session(session_id, user_id).await?;
    Ok(Json(snapshot.into()))
}

/// List the caller's sessions attributed to one calendar date, newest first.
#[utoipa::path(
    get,
    path = "/sessions",
    params(ListSessionsQuery),
    responses(
        (status = 200, description = "Sessions of that date", body = [SessionListItem]),
        (status = 400, description = "Malformed date")
    )
)]
pub async fn list_sessions_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Vec<SessionListItem>>, ApiError> {
    let date = parse_date(&query.date)?;
    let sessions = state.calendar.list_by_date(user_id, date).await?;
    Ok(Json(sessions.into_iter().map(SessionListItem::from).collect()))
}

/// Delete a session, its clips and their audio files.
#[utoipa::path(
    delete,
    path = "/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "Session to delete")),
    responses(
        (status = 200, description = "Session deleted", body = DeleteResponse),
        (status = 404, description = "Session not found")
    )
)]
pub async fn delete_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.engine.delete_session(session_id, user_id).await?;
    Ok(Json(DeleteResponse {
        ok: true,
        message: "Session and audio files deleted.".to_string(),
    }))
}

/// Delete a single clip and its audio file.
#[utoipa::path(
    delete,
    path = "/sessions/{session_id}/clips/{clip_id}",
    params(
        ("session_id" = Uuid, Path, description = "Owning session"),
        ("clip_id" = Uuid, Path, description = "Clip to delete")
    ),
    responses(
        (status = 200, description = "Clip deleted", body = DeleteResponse),
        (status = 404, description = "Session or clip not found")
    )
)]
pub async fn delete_clip_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path((session_id, clip_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.engine.delete_clip(session_id, clip_id, user_id).await?;
    Ok(Json(DeleteResponse {
        ok: true,
        message: "Clip deleted.".to_string(),
    }))
}

//=========================================================================================
// Calendar Handlers
//=========================================================================================

/// Per-day snore totals of finalized sessions within a date range.
#[utoipa::path(
    get,
    path = "/calendar/summary",
    params(SummaryQuery),
    responses(
        (status = 200, description = "One entry per date with sessions", body = [DaySummaryResponse]),
        (status = 400, description = "Malformed date")
    )
)]
pub async fn calendar_summary_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<Vec<DaySummaryResponse>>, ApiError> {
    let from = parse_date(&query.date_from)?;
    let to = parse_date(&query.date_to)?;
    let days = state.calendar.summary(user_id, from, to).await?;
    Ok(Json(days.into_iter().map(DaySummaryResponse::from).collect()))
}

//=========================================================================================
// Helpers
//=========================================================================================

fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, ApiError> {
    raw.parse::<T>().map_err(|_| {
        ApiError::Port(PortError::InvalidFormat(format!(
            "{} must be a number, got '{}'",
            field, raw
        )))
    })
}

fn missing(field: &str) -> ApiError {
    ApiError::BadRequest(format!("Multipart form must include '{}'", field))
}
