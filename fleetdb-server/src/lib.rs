//! fleetdb-server: the fleet backend process
//!
//! Connects PostgreSQL and MongoDB at startup, serves the status routes,
//! and releases both stores on SIGINT/SIGTERM or a failed startup.

pub mod app;
pub mod http;
pub mod tracing_setup;

pub use app::{run, Outcome};
pub use http::{AppState, ServerConfig};
