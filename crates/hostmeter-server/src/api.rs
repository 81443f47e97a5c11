//! Internal HTTP handlers.

use std::sync::Arc;

use axum::{
    extract::{Extension, Json},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use hostmeter_outbox::{count_pending, FlushError, FlushStatus};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::AppState;

/// Request header asking an operational endpoint to run synchronously.
pub const SYNCHRONOUS_REQUEST_HEADER: &str = "x-hostmeter-synchronous-request";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Response body for the flush endpoint. Counts are present only for
/// synchronous flushes.
#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub status: FlushStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flushed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<usize>,
}

impl FlushResponse {
    fn status(status: FlushStatus) -> Self {
        Self {
            status,
            flushed: None,
            skipped: None,
        }
    }
}

fn is_synchronous_request(headers: &HeaderMap) -> bool {
    headers
        .get(SYNCHRONOUS_REQUEST_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

/// Handler for `POST /internal/rpc/outbox/flush`.
pub async fn flush_outbox_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<FlushResponse>, ApiError> {
    if !is_synchronous_request(&headers) {
        let status = state.flusher.trigger();
        tracing::info!(?status, "outbox flush requested");
        return Ok(Json(FlushResponse::status(status)));
    }

    if !state.synchronous_operations_enabled {
        return Err(ApiError::BadRequest(
            "synchronous operations are not enabled".to_string(),
        ));
    }

    match state.flusher.flush().await {
        Ok(report) => {
            tracing::info!(
                flushed = report.flushed,
                skipped = report.skipped,
                "synchronous outbox flush finished"
            );
            Ok(Json(FlushResponse {
                status: FlushStatus::Success,
                flushed: Some(report.flushed),
                skipped: Some(report.skipped),
            }))
        }
        Err(FlushError::AlreadyRunning) => Ok(Json(FlushResponse::status(
            FlushStatus::AlreadyRunning,
        ))),
        Err(e) => {
            tracing::error!(error = %e, "synchronous outbox flush failed");
            Err(ApiError::InternalServerError(e.to_string()))
        }
    }
}

/// Handler for `GET /health`.
pub async fn health_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let pool = state.pool.clone();
    let pending = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            ApiError::InternalServerError(format!("db connection failed: {}", e))
        })?;
        count_pending(&conn).map_err(|e| ApiError::InternalServerError(e.to_string()))
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))??;

    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "pending_outbox": pending,
        "flush_running": state.flusher.is_running(),
        "processing": state.stats.snapshot(),
        "emitter": state.flusher.emitter().stats(),
    })))
}
