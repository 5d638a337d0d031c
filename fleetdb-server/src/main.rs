//! fleetdb - fleet backend entry point
//!
//! Loads `.env`, reads database settings from the environment (or a TOML
//! file), then hands off to [`fleetdb_server::run`] until a signal arrives.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fleetdb_core::{FleetDb, FleetDbConfig};
use fleetdb_server::http::shutdown_signal;
use fleetdb_server::tracing_setup::{self, TracingConfig};
use fleetdb_server::ServerConfig;

#[derive(Parser, Debug)]
#[command(
    name = "fleetdb",
    author,
    version,
    about = "Fleet backend with managed PostgreSQL and MongoDB connections"
)]
struct Cli {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on
    #[arg(long, short = 'p', env = "PORT", default_value_t = 5000)]
    port: u16,

    /// Allowed CORS origin (any when unset)
    #[arg(long, env = "CORS_ORIGIN")]
    cors_origin: Option<String>,

    /// TOML file with database settings, used instead of the environment
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Deployment environment, only reported in logs
    #[arg(long, env = "NODE_ENV", default_value = "development")]
    environment: String,

    /// Milliseconds to let in-flight requests finish after a signal
    #[arg(long, default_value_t = 10_000)]
    drain_timeout_ms: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn load_config(cli: &Cli) -> Result<FleetDbConfig> {
    let config = match &cli.config {
        Some(path) => FleetDbConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => FleetDbConfig::from_env().context("Failed to read database settings")?,
    };
    Ok(config)
}

async fn start(cli: Cli) -> Result<ExitCode> {
    let db_config = load_config(&cli)?;
    let server_config = ServerConfig {
        bind_addr: SocketAddr::new(cli.host, cli.port),
        cors_origin: cli.cors_origin.clone(),
        drain_timeout: Duration::from_millis(cli.drain_timeout_ms),
    };

    tracing::info!(
        environment = %cli.environment,
        port = cli.port,
        "Starting fleetdb"
    );

    let db = FleetDb::new(&db_config);
    let outcome = fleetdb_server::run(db, server_config, shutdown_signal()).await;
    tracing::info!(?outcome, "fleetdb stopped");
    Ok(outcome.exit_code())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Missing .env is fine; the environment may already be populated.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(err) = tracing_setup::init(&TracingConfig { debug: cli.debug }) {
        eprintln!("failed to initialize tracing: {err:#}");
    }
    match dotenv {
        Ok(path) => tracing::debug!("loaded environment from {}", path.display()),
        Err(err) if err.not_found() => tracing::debug!("no .env file"),
        Err(err) => tracing::warn!("ignoring unreadable .env: {}", err),
    }

    match start(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
