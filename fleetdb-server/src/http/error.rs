//! API error type with IntoResponse
//!
//! Database errors are converted to JSON responses with a status code that
//! tells the client whether retrying can help.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fleetdb_core::FleetDbError;
use serde_json::json;

/// API error type with automatic HTTP status mapping
#[derive(Debug)]
pub enum ApiError {
    /// Backend not connected or mid-teardown (503)
    Unavailable { message: String },

    /// Statement failed (500, logged)
    Query(FleetDbError),

    /// Internal error (500)
    Internal { message: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Unavailable { message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "error": "unavailable",
                    "message": message
                }),
            ),
            Self::Query(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "query_failed",
                        "message": e.to_string()
                    }),
                )
            }
            Self::Internal { message } => {
                tracing::error!("Internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "internal_error",
                        "message": "an internal error occurred"
                    }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<FleetDbError> for ApiError {
    fn from(e: FleetDbError) -> Self {
        match e {
            FleetDbError::ConnectionNotEstablished { .. }
            | FleetDbError::TransientUnavailable { .. } => Self::Unavailable {
                message: e.to_string(),
            },
            FleetDbError::QueryExecution { .. } => Self::Query(e),
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}
