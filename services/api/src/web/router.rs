//! services/api/src/web/router.rs
//!
//! Assembles the HTTP router: public auth routes, bearer-protected session and
//! calendar routes, CORS, the upload size limit and the Swagger UI.

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::web::{
    auth::{login_handler, refresh_handler, register_handler},
    middleware::require_auth,
    rest::{
        calendar_summary_handler, create_session_handler, delete_clip_handler,
        delete_session_handler, finalize_session_handler, get_session_handler, health_handler,
        list_sessions_handler, upload_clip_handler, ApiDoc,
    },
    state::AppState,
};

pub fn build_router(app_state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/", get(health_handler))
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/refresh", post(refresh_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/sessions", post(create_session_handler).get(list_sessions_handler))
        .route(
            "/sessions/{session_id}",
            get(get_session_handler).delete(delete_session_handler),
        )
        .route("/sessions/{session_id}/clips/upload", post(upload_clip_handler))
        .route("/sessions/{session_id}/clips/{clip_id}", delete(delete_clip_handler))
        .route("/sessions/{session_id}/finalize", post(finalize_session_handler))
        .route("/calendar/summary", get(calendar_summary_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(app_state.config.max_upload_bytes))
        .layer(cors_layer(app_state.config.cors_origin.as_deref()))
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    let headers = [AUTHORIZATION, CONTENT_TYPE, ACCEPT];

    match origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods(methods)
            .allow_headers(headers),
        Some(Err(e)) => {
            warn!("Ignoring invalid CORS_ORIGIN ({}), allowing any origin", e);
            CorsLayer::new().allow_origin(Any).allow_methods(methods).allow_headers(headers)
        }
        None => CorsLayer::new().allow_origin(Any).allow_methods(methods).allow_headers(headers),
    }
}
