//! fleetdb-core: connection lifecycle for the fleet backend's two stores
//!
//! PostgreSQL holds drivers, trucks, categories and users; MongoDB holds
//! telemetry and configuration parameters. This crate lazily establishes,
//! tracks and tears down both, behind the [`FleetDb`] façade.

pub mod backend;
pub mod config;
pub mod document;
pub mod error;
pub mod facade;
pub mod init;
pub mod registry;
pub mod relational;
pub mod shutdown;
pub mod sim;

pub use backend::{BackendKind, BackendState};
pub use config::{DocumentConfig, FleetDbConfig, RelationalConfig};
pub use document::{CollectionHandle, ConnectivityEvent, DocumentStoreManager};
pub use error::{FleetDbError, Result};
pub use facade::FleetDb;
pub use init::InitializationSequencer;
pub use registry::{ConnectionRegistry, ConnectionStatus};
pub use relational::{RelationalPoolManager, RowSet};
pub use shutdown::{ShutdownCoordinator, ShutdownReason};
