//! HTTP error mapping
//!
//! Translates the engine taxonomy into status codes and response bodies.
//! Signature failures answer with a bare 403 so probing the webhook teaches
//! the sender nothing; internal detail stays in the server log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use settlement_engine::error::EngineError;
use tracing::error;

/// Error type returned by every handler
pub enum ApiError {
    Engine(EngineError),
    Unauthorized(&'static str),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.to_string()),
            Self::Engine(err) => match &err {
                EngineError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
                // Conflict bodies carry the current state for operators
                EngineError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
                EngineError::Concurrency(_) => (
                    StatusCode::CONFLICT,
                    "operation already in progress, retry shortly".to_string(),
                ),
                EngineError::Gateway(_) => {
                    error!("{err}");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "payment temporarily unavailable, please retry".to_string(),
                    )
                }
                EngineError::Signature(_) => {
                    error!("{err}");
                    (StatusCode::FORBIDDEN, "forbidden".to_string())
                }
                EngineError::NotFound(entity, id) => {
                    (StatusCode::NOT_FOUND, format!("{entity} {id} not found"))
                }
                EngineError::Config(_)
                | EngineError::Serialization(_)
                | EngineError::Internal(_) => {
                    error!("{err}");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal error".to_string(),
                    )
                }
            },
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
