//! Axum server setup
//!
//! Server skeleton with:
//! - CORS from `CORS_ORIGIN` (any origin when unset)
//! - Security response headers
//! - Tracing middleware
//! - Panics in handlers turned into JSON 500 responses
//! - Graceful shutdown on SIGTERM/Ctrl+C, bounded by a drain timeout

use std::any::Any;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::Router;
use fleetdb_core::FleetDb;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{self, AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use super::error::ApiError;
use super::routes;

/// Headers added to every response unless a handler already set them
const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("content-security-policy", "default-src 'none'; frame-ancestors 'none'"),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=31536000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
];

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0:5000)
    pub bind_addr: SocketAddr,

    /// Allowed CORS origin; `None` or `*` allows any
    pub cors_origin: Option<String>,

    /// How long in-flight requests may run after a shutdown signal
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            cors_origin: None,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: FleetDb,
}

fn cors_layer(origin: Option<&str>) -> Result<CorsLayer, ServerError> {
    let allow_origin = match origin {
        None | Some("*") => AllowOrigin::from(cors::Any),
        Some(origin) => {
            let value = HeaderValue::from_str(origin)
                .map_err(|_| ServerError::InvalidOrigin(origin.to_string()))?;
            AllowOrigin::exact(value)
        }
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(cors::Any))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    ApiError::Internal {
        message: format!("handler panicked: {detail}"),
    }
    .into_response()
}

/// Wrap routes in the middleware stack, innermost first: panic recovery,
/// security headers, CORS, tracing.
fn with_middleware(
    routes: Router<AppState>,
    config: &ServerConfig,
) -> Result<Router<AppState>, ServerError> {
    let cors = cors_layer(config.cors_origin.as_deref())?;

    let routes = routes.layer(CatchPanicLayer::custom(panic_response));
    let routes = SECURITY_HEADERS.iter().fold(routes, |routes, &(name, value)| {
        routes.layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ))
    });
    Ok(routes.layer(cors).layer(TraceLayer::new_for_http()))
}

/// Build the router with every route and middleware layer.
pub fn build_router(state: AppState, config: &ServerConfig) -> Result<Router, ServerError> {
    let routes = Router::new()
        .merge(routes::health::router())
        .merge(routes::status::router());
    Ok(with_middleware(routes, config)?.with_state(state))
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
///
/// Returns the name of the signal that stopped the server. Requests still
/// running after `drain_timeout` are abandoned so the databases can be
/// released.
pub async fn run_server<F>(
    listener: TcpListener,
    app: Router,
    config: &ServerConfig,
    shutdown: F,
) -> Result<&'static str, ServerError>
where
    F: Future<Output = &'static str> + Send + 'static,
{
    let (signal_tx, signal_rx) = watch::channel(None::<&'static str>);
    let graceful = async move {
        let name = shutdown.await;
        let _ = signal_tx.send(Some(name));
    };

    let mut deadline_rx = signal_rx.clone();
    let drain_timeout = config.drain_timeout;
    let drain_deadline = async move {
        if deadline_rx.wait_for(Option::is_some).await.is_err() {
            // Server exited without a signal; the other branch wins.
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(drain_timeout).await;
    };

    tracing::info!("Server listening on {}", config.bind_addr);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(graceful)
        .into_future();

    tokio::select! {
        result = server => result?,
        _ = drain_deadline => {
            tracing::warn!(
                drain_timeout_ms = drain_timeout.as_millis() as u64,
                "in-flight requests did not finish in time, abandoning them"
            );
        }
    }

    let name = (*signal_rx.borrow()).unwrap_or("server exit");
    tracing::info!("Server shutdown complete");
    Ok(name)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM) and return its name.
pub async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting shutdown");
            "SIGINT"
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting shutdown");
            "SIGTERM"
        }
    }
}

/// Server error type
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid CORS origin: {0}")]
    InvalidOrigin(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use fleetdb_core::sim::{SimConnector, SimDocumentDriver};
    use fleetdb_core::{DocumentConfig, FleetDbConfig, RelationalConfig};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn sim_state() -> (AppState, SimConnector) {
        let config = FleetDbConfig {
            relational: RelationalConfig::new("postgres://sim/fleet"),
            document: DocumentConfig::new("mongodb://sim.invalid:27017", "fleetdb"),
        };
        let connector = SimConnector::new();
        let db = FleetDb::with_drivers(
            &config,
            Arc::new(connector.clone()),
            Arc::new(SimDocumentDriver::new()),
        );
        (AppState { db }, connector)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 5000);
        assert!(config.cors_origin.is_none());
    }

    #[test]
    fn rejects_unparseable_origin() {
        assert!(cors_layer(Some("http://bad\norigin")).is_err());
        assert!(cors_layer(Some("https://fleet.example.com")).is_ok());
        assert!(cors_layer(Some("*")).is_ok());
    }

    #[tokio::test]
    async fn status_reports_both_backends() {
        let (state, _connector) = sim_state();
        state.db.initialize().await.unwrap();
        let app = build_router(state, &ServerConfig::default()).unwrap();

        let (status, body) = get_json(app, "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "active");
        assert_eq!(body["databases"]["postgres"], "connected");
        assert_eq!(body["databases"]["mongo"], "connected");
    }

    #[tokio::test]
    async fn status_probes_postgres_before_mongo_connects() {
        let (state, _connector) = sim_state();
        let app = build_router(state, &ServerConfig::default()).unwrap();

        let (status, body) = get_json(app, "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["databases"]["postgres"], "connected");
        assert_eq!(body["databases"]["mongo"], "disconnected");
    }

    #[tokio::test]
    async fn failed_probe_is_500() {
        let (state, connector) = sim_state();
        connector.fail_queries_containing("NOW()");
        let app = build_router(state.clone(), &ServerConfig::default()).unwrap();

        let (status, body) = get_json(app, "/api/status").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "query_failed");
        assert!(!state.db.status().relational_connected);
    }

    #[tokio::test]
    async fn health_is_independent_of_databases() {
        let (state, connector) = sim_state();
        let app = build_router(state, &ServerConfig::default()).unwrap();
        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "fleetdb-server");
        assert_eq!(body["last_known"]["relational_connected"], false);
        assert_eq!(body["last_known"]["document_connected"], false);
        assert_eq!(connector.pools_built(), 0);
    }

    #[tokio::test]
    async fn health_reports_last_known_flags() {
        let (state, _connector) = sim_state();
        state.db.initialize().await.unwrap();
        let app = build_router(state, &ServerConfig::default()).unwrap();
        let (_, body) = get_json(app, "/health").await;
        assert_eq!(body["last_known"]["relational_connected"], true);
        assert_eq!(body["last_known"]["document_connected"], true);
    }

    #[tokio::test]
    async fn responses_carry_security_headers() {
        let (state, _connector) = sim_state();
        let app = build_router(state, &ServerConfig::default()).unwrap();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let headers = response.headers();
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
        assert_eq!(headers["referrer-policy"], "no-referrer");
        assert!(headers.contains_key("strict-transport-security"));
    }

    #[tokio::test]
    async fn handler_panic_becomes_json_500() {
        async fn explode() -> &'static str {
            panic!("camion 7 has no driver")
        }

        let (state, _connector) = sim_state();
        let routes = Router::new().route("/explode", axum::routing::get(explode));
        let app = with_middleware(routes, &ServerConfig::default())
            .unwrap()
            .with_state(state);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/explode").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "internal_error");
        assert!(!body["message"].as_str().unwrap().contains("camion"));

        // The server keeps answering after a panic.
        let (status, _) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn run_server_returns_signal_name() {
        let (state, _connector) = sim_state();
        let config = ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..ServerConfig::default()
        };
        let app = build_router(state, &config).unwrap();
        let listener = TcpListener::bind(config.bind_addr).await.unwrap();

        let name = run_server(listener, app, &config, async { "SIGTERM" })
            .await
            .unwrap();
        assert_eq!(name, "SIGTERM");
    }
}
