/// Structured error types for fleetdb-core.
///
/// Uses `thiserror` so route adapters can match on the variant and pick a
/// response. The binary crate (fleetdb-server) wraps these in `anyhow` for
/// startup plumbing.
use crate::backend::BackendKind;
use thiserror::Error;

/// Boxed error reported by an underlying database driver.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for fleetdb-core operations
#[derive(Error, Debug)]
pub enum FleetDbError {
    /// A collection or pool was requested before a successful connect
    #[error("{backend} connection is not established")]
    ConnectionNotEstablished { backend: BackendKind },

    /// The backend is being torn down and cannot hand out resources
    #[error("{backend} backend is shutting down")]
    TransientUnavailable { backend: BackendKind },

    /// The driver rejected or failed a statement
    #[error("query failed: {source}")]
    QueryExecution {
        #[source]
        source: DriverError,
    },

    /// Startup could not reach a backend; fatal for the process
    #[error("failed to initialize {backend}: {source}")]
    Initialization {
        backend: BackendKind,
        #[source]
        source: DriverError,
    },

    /// Releasing a pool or connection failed
    #[error("failed to close {backend}: {source}")]
    Shutdown {
        backend: BackendKind,
        #[source]
        source: DriverError,
    },

    /// Required setting missing or malformed
    #[error("Configuration error: {reason}")]
    Config { reason: String },
}

/// Result type alias for fleetdb-core operations
pub type Result<T> = std::result::Result<T, FleetDbError>;

impl FleetDbError {
    pub fn not_established(backend: BackendKind) -> Self {
        Self::ConnectionNotEstablished { backend }
    }

    pub fn unavailable(backend: BackendKind) -> Self {
        Self::TransientUnavailable { backend }
    }

    pub fn query(source: impl Into<DriverError>) -> Self {
        Self::QueryExecution {
            source: source.into(),
        }
    }

    pub fn initialization(backend: BackendKind, source: impl Into<DriverError>) -> Self {
        Self::Initialization {
            backend,
            source: source.into(),
        }
    }

    pub fn shutdown(backend: BackendKind, source: impl Into<DriverError>) -> Self {
        Self::Shutdown {
            backend,
            source: source.into(),
        }
    }

    /// Create a config error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Errors the caller may retry later without restarting the process.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionNotEstablished { .. } | Self::TransientUnavailable { .. }
        )
    }
}
