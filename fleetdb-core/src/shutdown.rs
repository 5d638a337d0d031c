//! Ordered, idempotent teardown of both backends
//!
//! Relational goes first, then document. Only one teardown sequence runs at
//! a time: a caller arriving while one is in flight waits for it, then finds
//! both backends already released and does nothing.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::document::DocumentStoreManager;
use crate::error::Result;
use crate::relational::RelationalPoolManager;

/// Why a teardown was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / SIGTERM / Ctrl+C
    Signal(&'static str),
    /// Startup probing failed
    InitializationFailure,
    /// Explicit call through the façade
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "signal {}", name),
            Self::InitializationFailure => f.write_str("initialization failure"),
            Self::Requested => f.write_str("request"),
        }
    }
}

pub struct ShutdownCoordinator {
    relational: Arc<RelationalPoolManager>,
    document: Arc<DocumentStoreManager>,
    gate: Mutex<()>,
    completed: AtomicUsize,
}

impl ShutdownCoordinator {
    pub fn new(relational: Arc<RelationalPoolManager>, document: Arc<DocumentStoreManager>) -> Self {
        Self {
            relational,
            document,
            gate: Mutex::new(()),
            completed: AtomicUsize::new(0),
        }
    }

    /// Teardown sequences that have run to completion (successful or not).
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Release both backends.
    ///
    /// Both are attempted even if the first fails; the first error is
    /// returned and any later one is logged.
    pub async fn teardown(&self, reason: ShutdownReason) -> Result<()> {
        let _gate = self.gate.lock().await;
        tracing::info!(%reason, "closing database connections");

        let relational = self.relational.close().await;
        let document = self.document.close().await;
        self.completed.fetch_add(1, Ordering::SeqCst);

        match (relational, document) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Err(first), Err(second)) => {
                tracing::error!(error = %second, "additional teardown failure");
                Err(first)
            }
        }
    }
}
