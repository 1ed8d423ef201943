//! HTTP endpoints for devlink-relay.
//!
//! Provides registration, the WebSocket upgrade, discovery, file transfer,
//! health checks and metrics.

pub mod api;
pub mod health;
mod metrics;
pub mod ws;

use crate::error::HubError;
use crate::hub::Hub;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use health::HealthStatus;

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the HTTP router with all endpoints.
pub fn build_router(hub: Arc<Hub>) -> Router {
    let http = hub.config().http.clone();
    let upload_limit = hub.config().storage.max_file_size + MULTIPART_OVERHEAD;

    let mut router = Router::new()
        .route("/api/register", post(api::register))
        .route("/ws", get(ws::ws_handler))
        .route("/api/connected-devices", get(api::connected_devices))
        .route(
            "/api/file",
            post(api::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/file/:id", get(api::download_file))
        .route("/health", get(health::health_handler));

    if http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    let router = router
        .layer(DefaultBodyLimit::max(http.max_body_size))
        .layer(Extension(hub))
        .layer(TraceLayer::new_for_http());

    if http.cors_allow_any {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::AlreadyRegistered { .. }
            | HubError::UnknownToken { .. }
            | HubError::Validation(_)
            | HubError::FileTooLarge { .. } => StatusCode::BAD_REQUEST,
            HubError::DeviceOffline { .. } => StatusCode::NOT_FOUND,
            HubError::NotFound { .. } => return StatusCode::NOT_FOUND.into_response(),
            HubError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            HubError::Wire(_) => {
                tracing::error!("Request failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(self.to_string())).into_response()
    }
}
