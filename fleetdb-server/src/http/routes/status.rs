//! Database status endpoint
//!
//! GET /api/status - runs a live PostgreSQL probe, then reports both
//! connectivity flags from the registry.

use axum::extract::State;
use axum::{routing::get, Json, Router};
use fleetdb_core::init::RELATIONAL_PROBE;
use serde::Serialize;

use crate::http::error::ApiError;
use crate::http::server::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub databases: DatabaseStatus,
}

#[derive(Debug, Serialize)]
pub struct DatabaseStatus {
    pub postgres: &'static str,
    pub mongo: &'static str,
}

fn label(connected: bool) -> &'static str {
    if connected {
        "connected"
    } else {
        "disconnected"
    }
}

/// GET /api/status
async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    state.db.query(RELATIONAL_PROBE, &[]).await?;

    let flags = state.db.status();
    Ok(Json(StatusResponse {
        status: "active",
        databases: DatabaseStatus {
            postgres: label(flags.relational_connected),
            mongo: label(flags.document_connected),
        },
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/status", get(status))
}
