//! GET /health - process liveness
//!
//! Answers without a database round trip. The connectivity flags are the
//! registry's last known values, not a fresh probe; `/api/status` probes.

use axum::extract::State;
use axum::{routing::get, Json, Router};
use fleetdb_core::ConnectionStatus;
use serde::Serialize;

use crate::http::server::AppState;

#[derive(Debug, Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub last_known: ConnectionStatus,
}

async fn liveness(State(state): State<AppState>) -> Json<Liveness> {
    Json(Liveness {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        last_known: state.db.status(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(liveness))
}
