//! HTTP error mapping.
//!
//! Every failure surfaces as JSON `{"detail": "..."}` with the status the
//! error kind maps to.  Internal details are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use db::DbError;
use engine::EngineError;
use nodes::NodeError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Validation(String),
    QueueFull(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
            Self::Validation(detail) => (StatusCode::BAD_REQUEST, detail),
            Self::QueueFull(detail) => (StatusCode::TOO_MANY_REQUESTS, detail),
            Self::Internal(detail) => {
                error!("internal error: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound => Self::NotFound("resource not found".to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(_) => Self::NotFound(e.to_string()),
            EngineError::QueueFull { .. } => Self::QueueFull(e.to_string()),
            EngineError::CycleDetected { .. }
            | EngineError::UnknownNodeReference { .. }
            | EngineError::DuplicateEdge { .. } => Self::Validation(e.to_string()),
            EngineError::Database(DbError::NotFound) => {
                Self::NotFound("resource not found".to_string())
            }
            EngineError::Database(other) => Self::Internal(other.to_string()),
        }
    }
}

impl From<NodeError> for ApiError {
    fn from(e: NodeError) -> Self {
        match e {
            NodeError::Validation(detail) => Self::Validation(detail),
            NodeError::NotFound(detail) => Self::NotFound(detail),
            other => Self::Internal(other.to_string()),
        }
    }
}
