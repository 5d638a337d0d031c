//! The narrow interface route handlers consume
//!
//! [`FleetDb`] is built once at the composition root and cloned into every
//! handler. It owns the registry and wires the managers, the sequencer and
//! the shutdown coordinator around it.

use std::sync::Arc;

use serde_json::Value;

use crate::config::FleetDbConfig;
use crate::document::{CollectionHandle, DocumentDriver, DocumentStoreManager, MongoDriver};
use crate::error::Result;
use crate::init::InitializationSequencer;
use crate::registry::{ConnectionRegistry, ConnectionStatus};
use crate::relational::{PgConnector, RelationalConnector, RelationalPoolManager, RowSet};
use crate::shutdown::{ShutdownCoordinator, ShutdownReason};

/// Shared handle to both stores
#[derive(Clone)]
pub struct FleetDb {
    inner: Arc<FleetDbInner>,
}

struct FleetDbInner {
    registry: Arc<ConnectionRegistry>,
    relational: Arc<RelationalPoolManager>,
    document: Arc<DocumentStoreManager>,
    sequencer: InitializationSequencer,
    coordinator: ShutdownCoordinator,
}

impl FleetDb {
    /// Wire up the PostgreSQL and MongoDB drivers. Nothing connects yet.
    pub fn new(config: &FleetDbConfig) -> Self {
        let connector = PgConnector::new(config.relational.clone());
        let driver = MongoDriver::new(config.document.max_pool_size).with_app_name("fleetdb");
        Self::with_drivers(config, Arc::new(connector), Arc::new(driver))
    }

    pub fn with_drivers(
        config: &FleetDbConfig,
        connector: Arc<dyn RelationalConnector>,
        driver: Arc<dyn DocumentDriver>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let relational = Arc::new(
            RelationalPoolManager::new(Arc::clone(&registry), connector)
                .with_release_timeout(config.relational.release_timeout()),
        );
        let document = Arc::new(
            DocumentStoreManager::new(Arc::clone(&registry), driver)
                .with_release_timeout(config.document.release_timeout()),
        );
        let sequencer = InitializationSequencer::new(
            Arc::clone(&relational),
            Arc::clone(&document),
            config.document.clone(),
        );
        let coordinator = ShutdownCoordinator::new(Arc::clone(&relational), Arc::clone(&document));

        Self {
            inner: Arc::new(FleetDbInner {
                registry,
                relational,
                document,
                sequencer,
                coordinator,
            }),
        }
    }

    /// Probe PostgreSQL and connect MongoDB; see [`InitializationSequencer`].
    pub async fn initialize(&self) -> Result<()> {
        self.inner.sequencer.run().await
    }

    /// Run a parameterized statement against the relational store.
    ///
    /// Parameters keep their JSON type: pass ids as numbers (`json!(7)`),
    /// not strings, or cast in SQL (`WHERE id = $1::int`).
    pub async fn query(&self, text: &str, params: &[Value]) -> Result<RowSet> {
        self.inner.relational.query(text, params).await
    }

    pub fn get_collection(&self, name: &str) -> Result<CollectionHandle> {
        self.inner.document.get_collection(name)
    }

    pub fn data_collection(&self) -> Result<CollectionHandle> {
        self.inner.document.data_collection()
    }

    pub fn parameters_collection(&self) -> Result<CollectionHandle> {
        self.inner.document.parameters_collection()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.registry.status()
    }

    /// Idempotent; safe to call from several tasks at once.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_for(ShutdownReason::Requested).await
    }

    pub async fn shutdown_for(&self, reason: ShutdownReason) -> Result<()> {
        self.inner.coordinator.teardown(reason).await
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    pub fn relational(&self) -> &Arc<RelationalPoolManager> {
        &self.inner.relational
    }

    pub fn document(&self) -> &Arc<DocumentStoreManager> {
        &self.inner.document
    }

    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.inner.coordinator
    }
}
