//! HTTP request handlers

use super::types::{ErrorResponse, HealthResponse, WebhookResponse};
use super::AppState;
use crate::max::types::Update;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tower_http::trace::TraceLayer;

const VERSION: &str = concat!("dean-office-bot ", env!("CARGO_PKG_VERSION"));

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Updates pushed by the MAX platform
        .route("/webhook", post(receive_update))
        .route("/health", get(health))
        .route("/version", get(get_version))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Accept one update. Unknown update types are acknowledged and dropped so
/// the platform does not redeliver them.
async fn receive_update(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<WebhookResponse>, AppError> {
    let update: Update = serde_json::from_value(payload)
        .map_err(|e| AppError::BadRequest(format!("Malformed update: {e}")))?;

    let Some(inbound) = update.into_inbound() else {
        return Ok(Json(WebhookResponse { accepted: false }));
    };

    let accepted = state.runtime.submit(inbound).await;
    Ok(Json(WebhookResponse { accepted }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: VERSION,
        active_workers: state.runtime.active_workers().await,
        open_flows: state.runtime.dispatcher().sessions().open_flows(),
    })
}

async fn get_version() -> &'static str {
    VERSION
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        tracing::warn!(status = %status, error = %message, "Request rejected");
        (status, Json(ErrorResponse::new(message))).into_response()
    }
}
