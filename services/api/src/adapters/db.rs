//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `SessionStore` and `UserStore` ports from the `core` crate. It handles all
//! interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snore_core::domain::{
    Clip, NewClip, Session, SessionStatus, User, UserCredentials, COUNTER_LIMIT,
};
use snore_core::ports::{FinalizeOutcome, PortError, PortResult, SessionStore, UserStore};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, user_id, status, started_at, ended_at, has_snore, snore_count, \
     snore_total_sec, sleep_duration, sleep_quality, advice, created_at";

// `COUNTER_LIMIT` is `i32::MAX`, so the cast is lossless.
const COUNTER_LIMIT_DB: i32 = COUNTER_LIMIT as i32;

const CLIP_COLUMNS: &str =
    "id, session_id, file_path, start_sec, end_sec, duration_sec, confidence, created_at";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the storage ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn to_db_int(value: u32, field: &str) -> PortResult<i32> {
    i32::try_from(value)
        .map_err(|_| PortError::InvalidFormat(format!("{} is too large: {}", field, value)))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    email: String,
    password_hash: String,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            user_id: self.user_id,
            email: self.email,
        }
    }

    fn to_credentials(self) -> UserCredentials {
        UserCredentials {
            user_id: self.user_id,
            email: self.email,
            hashed_password: self.password_hash,
        }
    }
}

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    user_id: Uuid,
    status: String,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    has_snore: bool,
    snore_count: i32,
    snore_total_sec: i32,
    sleep_duration: Option<f64>,
    sleep_quality: Option<String>,
    advice: Option<String>,
    created_at: DateTime<Utc>,
}
impl SessionRecord {
    fn to_domain(self) -> PortResult<Session> {
        let sleep_quality = match self.sleep_quality {
            Some(label) => Some(label.parse().map_err(|_| {
                PortError::Unexpected(format!("Stored sleep quality '{}' is unknown", label))
            })?),
            None => None,
        };
        Ok(Session {
            id: self.id,
            user_id: self.user_id,
            status: self.status.parse()?,
            started_at: self.started_at,
            ended_at: self.ended_at,
            has_snore: self.has_snore,
            snore_count: self.snore_count.max(0) as u32,
            snore_total_sec: self.snore_total_sec.max(0) as u32,
            sleep_duration: self.sleep_duration,
            sleep_quality,
            advice: self.advice,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct ClipRecord {
    id: Uuid,
    session_id: Uuid,
    file_path: String,
    start_sec: f64,
    end_sec: f64,
    duration_sec: i32,
    confidence: Option<i16>,
    created_at: DateTime<Utc>,
}
impl ClipRecord {
    fn to_domain(self) -> Clip {
        Clip {
            id: self.id,
            session_id: self.session_id,
            blob_ref: self.file_path,
            start_sec: self.start_sec,
            end_sec: self.end_sec,
            duration_sec: self.duration_sec.max(1) as u32,
            confidence: self.confidence.map(|c| c.clamp(0, 100) as u8),
            created_at: self.created_at,
        }
    }
}

//=========================================================================================
// `SessionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionStore for DbAdapter {
    async fn create_session(&self, session: Session) -> PortResult<Session> {
        let query = format!(
            "INSERT INTO snore_sessions (id, user_id, status, started_at, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            SESSION_COLUMNS
        );
        let record = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(session.id)
            .bind(session.user_id)
            .bind(session.status.as_str())
            .bind(session.started_at)
            .bind(session.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        let query = format!("SELECT {} FROM snore_sessions WHERE id = $1", SESSION_COLUMNS);
        let record = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => {
                    PortError::NotFound(format!("Session {} not found", session_id))
                }
                _ => unexpected(e),
            })?;
        record.to_domain()
    }

    async fn list_sessions_for_user(&self, user_id: Uuid) -> PortResult<Vec<Session>> {
        let query = format!(
            "SELECT {} FROM snore_sessions WHERE user_id = $1 ORDER BY created_at ASC",
            SESSION_COLUMNS
        );
        let records = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn append_clip(&self, clip: NewClip) -> PortResult<Clip> {
        let duration_sec = to_db_int(clip.duration_sec, "duration_sec")?;
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // The row lock taken by this UPDATE serializes concurrent uploads.
        let bumped = sqlx::query(
            "UPDATE snore_sessions \
             SET snore_count = snore_count + 1, \
                 snore_total_sec = snore_total_sec + $2, \
                 has_snore = TRUE \
             WHERE id = $1 AND status = 'open' \
               AND snore_count < $3 AND snore_total_sec <= $3 - $2",
        )
        .bind(clip.session_id)
        .bind(duration_sec)
        .bind(COUNTER_LIMIT_DB)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?
        .rows_affected();

        if bumped == 0 {
            let status: Option<String> =
                sqlx::query_scalar("SELECT status FROM snore_sessions WHERE id = $1")
                    .bind(clip.session_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(unexpected)?;
            return Err(match status.as_deref() {
                Some("open") => PortError::InvalidState("session snore totals are full".to_string()),
                Some(_) => PortError::InvalidState("session already finalized".to_string()),
                None => PortError::NotFound(format!("Session {} not found", clip.session_id)),
            });
        }

        let query = format!(
            "INSERT INTO snore_clips (id, session_id, file_path, start_sec, end_sec, duration_sec, confidence) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            CLIP_COLUMNS
        );
        let record = sqlx::query_as::<_, ClipRecord>(&query)
            .bind(Uuid::new_v4())
            .bind(clip.session_id)
            .bind(&clip.blob_ref)
            .bind(clip.start_sec)
            .bind(clip.end_sec)
            .bind(duration_sec)
            .bind(clip.confidence.map(i16::from))
            .fetch_one(&mut *tx)
            .await
            .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn finalize_session(
        &self,
        expected: &Session,
        finalized: &Session,
    ) -> PortResult<FinalizeOutcome> {
        let query = format!(
            "UPDATE snore_sessions \
             SET status = $2, started_at = $3, ended_at = $4, has_snore = $5, \
                 snore_count = $6, snore_total_sec = $7, sleep_duration = $8, \
                 sleep_quality = $9, advice = $10 \
             WHERE id = $1 AND status = 'open' AND snore_count = $11 AND snore_total_sec = $12 \
             RETURNING {}",
            SESSION_COLUMNS
        );
        let record = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(expected.id)
            .bind(SessionStatus::Finalized.as_str())
            .bind(finalized.started_at)
            .bind(finalized.ended_at)
            .bind(finalized.has_snore)
            .bind(to_db_int(finalized.snore_count, "snore_count")?)
            .bind(to_db_int(finalized.snore_total_sec, "snore_total_sec")?)
            .bind(finalized.sleep_duration)
            .bind(finalized.sleep_quality.map(|q| q.as_str()))
            .bind(finalized.advice.as_deref())
            .bind(to_db_int(expected.snore_count, "snore_count")?)
            .bind(to_db_int(expected.snore_total_sec, "snore_total_sec")?)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;

        match record {
            Some(record) => Ok(FinalizeOutcome::Applied(record.to_domain()?)),
            None => Ok(FinalizeOutcome::Conflict),
        }
    }

    async fn list_clips(&self, session_id: Uuid) -> PortResult<Vec<Clip>> {
        let query = format!(
            "SELECT {} FROM snore_clips WHERE session_id = $1 ORDER BY start_sec ASC, created_at ASC",
            CLIP_COLUMNS
        );
        let records = sqlx::query_as::<_, ClipRecord>(&query)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn get_clip(&self, clip_id: Uuid) -> PortResult<Clip> {
        let query = format!("SELECT {} FROM snore_clips WHERE id = $1", CLIP_COLUMNS);
        let record = sqlx::query_as::<_, ClipRecord>(&query)
            .bind(clip_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => PortError::NotFound(format!("Clip {} not found", clip_id)),
                _ => unexpected(e),
            })?;
        Ok(record.to_domain())
    }

    async fn delete_clip(&self, clip_id: Uuid) -> PortResult<()> {
        sqlx::query("DELETE FROM snore_clips WHERE id = $1")
            .bind(clip_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn delete_session(&self, session_id: Uuid) -> PortResult<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let removed: Vec<String> =
            sqlx::query_scalar("DELETE FROM snore_clips WHERE session_id = $1 RETURNING file_path")
                .bind(session_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(unexpected)?;
        sqlx::query("DELETE FROM snore_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)?;
        Ok(removed)
    }
}

//=========================================================================================
// `UserStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl UserStore for DbAdapter {
    async fn create_user(&self, email: &str, hashed_password: &str) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (user_id, email, password_hash) VALUES ($1, $2, $3) \
             RETURNING user_id, email, password_hash",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                PortError::Conflict("Email already registered".to_string())
            }
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT user_id, email, password_hash FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("User {} not found", email)),
            _ => unexpected(e),
        })?;
        Ok(record.to_credentials())
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT user_id, email, password_hash FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("User {} not found", user_id)),
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }
}
