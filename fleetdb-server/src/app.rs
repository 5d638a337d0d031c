//! Process lifecycle: startup probing, serving, teardown and exit status
//!
//! Two paths lead to teardown and they may race: a termination signal
//! (at any time, including during startup) and a failed startup probe.
//! Both go through the same coordinator, which runs at most one teardown
//! at a time.

use std::future::Future;
use std::process::ExitCode;

use fleetdb_core::{FleetDb, ShutdownReason};
use tokio::net::TcpListener;

use crate::http::{build_router, run_server, AppState, ServerConfig};

/// How the process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stopped by a signal and both stores released
    Clean,
    /// Stopped by a signal but a store failed to release
    ShutdownFailed,
    /// A startup probe failed
    InitializationFailed,
    /// The HTTP listener could not start or crashed
    ServerFailed,
}

impl Outcome {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Clean => ExitCode::SUCCESS,
            _ => ExitCode::FAILURE,
        }
    }
}

async fn teardown(db: &FleetDb, reason: ShutdownReason) -> bool {
    match db.shutdown_for(reason).await {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(error = %err, %reason, "teardown failed");
            false
        }
    }
}

/// Initialize both stores, serve until `signal` resolves, then tear down.
pub async fn run<S>(db: FleetDb, config: ServerConfig, signal: S) -> Outcome
where
    S: Future<Output = &'static str> + Send + 'static,
{
    let mut signal = Box::pin(signal);

    let initialized = tokio::select! {
        result = db.initialize() => result,
        name = &mut signal => {
            return match teardown(&db, ShutdownReason::Signal(name)).await {
                true => Outcome::Clean,
                false => Outcome::ShutdownFailed,
            };
        }
    };

    if let Err(err) = initialized {
        tracing::error!(error = %err, "Database initialization failed");
        // Exit status is 1 whatever the teardown reports.
        teardown(&db, ShutdownReason::InitializationFailure).await;
        return Outcome::InitializationFailed;
    }

    let served = async {
        let app = build_router(AppState { db: db.clone() }, &config)?;
        let listener = TcpListener::bind(config.bind_addr).await?;
        run_server(listener, app, &config, signal).await
    }
    .await;

    match served {
        Ok(name) => match teardown(&db, ShutdownReason::Signal(name)).await {
            true => Outcome::Clean,
            false => Outcome::ShutdownFailed,
        },
        Err(err) => {
            tracing::error!(error = %err, "HTTP server failed");
            teardown(&db, ShutdownReason::Requested).await;
            Outcome::ServerFailed
        }
    }
}
