//! Document store: connect/disconnect and named collection accessors
//!
//! The driver reports connectivity changes through a [`ConnectivityObserver`]
//! registered at connect time. Events are mirrored into the registry as they
//! arrive and may race with explicit `connect()`/`close()` calls; events from
//! a session that has since been replaced are ignored.

pub mod mongo;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::Document;
use tokio::sync::Mutex;

use crate::backend::{BackendKind, BackendResource};
use crate::error::{DriverError, FleetDbError, Result};
use crate::registry::ConnectionRegistry;

pub use mongo::{MongoDriver, MongoSession};

const BACKEND: BackendKind = BackendKind::Document;

/// Raw telemetry readings
pub const DATA_COLLECTION: &str = "datos";
/// Configuration parameters
pub const PARAMETERS_COLLECTION: &str = "parametros";

/// Handle scoped to one collection; creating it needs no round trip.
pub type CollectionHandle = mongodb::Collection<Document>;

/// Connectivity notifications raised by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Connected,
    Disconnected,
}

/// Receives driver connectivity notifications.
pub trait ConnectivityObserver: Send + Sync {
    fn on_event(&self, event: ConnectivityEvent);
}

/// Where and how to connect
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub uri: String,
    pub database: String,
    pub timeout: Duration,
}

/// A connected client.
#[async_trait]
pub trait DocumentSession: Send + Sync {
    fn collection(&self, name: &str) -> CollectionHandle;

    async fn disconnect(&self) -> std::result::Result<(), DriverError>;
}

/// Opens sessions against the document store.
#[async_trait]
pub trait DocumentDriver: Send + Sync {
    /// Connect and verify reachability. Implementations must honour
    /// `target.timeout` for server selection.
    async fn connect(
        &self,
        target: &ConnectTarget,
        observer: Arc<dyn ConnectivityObserver>,
    ) -> std::result::Result<Arc<dyn DocumentSession>, DriverError>;
}

/// Mirrors driver events for one session generation into the registry.
struct RegistryObserver {
    registry: Arc<ConnectionRegistry>,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl ConnectivityObserver for RegistryObserver {
    fn on_event(&self, event: ConnectivityEvent) {
        if self.current.load(Ordering::SeqCst) != self.generation {
            tracing::debug!(?event, generation = self.generation, "ignoring event from stale session");
            return;
        }
        match event {
            ConnectivityEvent::Connected => {
                // A teardown in flight owns the flag.
                if !self.registry.is_closing(BACKEND) {
                    self.registry.set_connected(BACKEND, true);
                    tracing::info!("MongoDB connection established");
                }
            }
            ConnectivityEvent::Disconnected => {
                self.registry.set_connected(BACKEND, false);
                tracing::warn!("MongoDB disconnected");
            }
        }
    }
}

pub struct DocumentStoreManager {
    registry: Arc<ConnectionRegistry>,
    driver: Arc<dyn DocumentDriver>,
    lifecycle: Mutex<()>,
    generation: Arc<AtomicU64>,
    release_timeout: Option<Duration>,
}

impl DocumentStoreManager {
    pub fn new(registry: Arc<ConnectionRegistry>, driver: Arc<dyn DocumentDriver>) -> Self {
        Self {
            registry,
            driver,
            lifecycle: Mutex::new(()),
            generation: Arc::new(AtomicU64::new(0)),
            release_timeout: None,
        }
    }

    /// Bound how long `close()` waits for the driver to disconnect.
    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = Some(timeout);
        self
    }

    fn should_skip_connect(&self) -> bool {
        let state = self.registry.get(BACKEND);
        state.connected || state.closing
    }

    /// Connect unless already connected or closing.
    ///
    /// A failure leaves `connected` untouched and is reported as
    /// [`FleetDbError::Initialization`].
    pub async fn connect(&self, uri: &str, database: &str, timeout: Duration) -> Result<()> {
        if self.should_skip_connect() {
            return Ok(());
        }
        let _guard = self.lifecycle.lock().await;
        if self.should_skip_connect() {
            return Ok(());
        }

        let target = ConnectTarget {
            uri: uri.to_string(),
            database: database.to_string(),
            timeout,
        };
        let was_connected = self.registry.is_connected(BACKEND);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let observer = Arc::new(RegistryObserver {
            registry: Arc::clone(&self.registry),
            current: Arc::clone(&self.generation),
            generation,
        });

        let attempt = self.driver.connect(&target, observer);
        let failure: DriverError = match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(session)) => {
                self.registry
                    .set_resource(BACKEND, Some(BackendResource::Session(session)));
                self.registry.set_connected(BACKEND, true);
                tracing::info!(database, "MongoDB connected successfully");
                return Ok(());
            }
            Ok(Err(err)) => {
                tracing::error!(error = %err, "MongoDB connection error");
                err
            }
            Err(_) => {
                tracing::error!(timeout_ms = timeout.as_millis() as u64, "MongoDB connection timed out");
                format!("no response within {:?}", timeout).into()
            }
        };

        // The failed attempt's observer may already have reported the
        // server; retire it and undo anything it wrote.
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.registry.set_connected(BACKEND, was_connected);
        Err(FleetDbError::initialization(BACKEND, failure))
    }

    /// Handle to a named collection; fails fast when not connected.
    pub fn get_collection(&self, name: &str) -> Result<CollectionHandle> {
        let state = self.registry.get(BACKEND);
        if !state.connected {
            return Err(FleetDbError::not_established(BACKEND));
        }
        let session = state
            .resource
            .as_ref()
            .and_then(|resource| resource.as_session())
            .ok_or_else(|| FleetDbError::not_established(BACKEND))?;
        Ok(session.collection(name))
    }

    pub fn data_collection(&self) -> Result<CollectionHandle> {
        self.get_collection(DATA_COLLECTION)
    }

    pub fn parameters_collection(&self) -> Result<CollectionHandle> {
        self.get_collection(PARAMETERS_COLLECTION)
    }

    /// Disconnect if connected.
    ///
    /// A session left behind by a driver-reported disconnect is released
    /// too. `closing` is always reset before returning, even when the
    /// driver fails to disconnect.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let state = self.registry.get(BACKEND);
        if state.closing || (!state.connected && !state.has_resource()) {
            return Ok(());
        }
        let Some(session) = state.resource.as_ref().and_then(|r| r.as_session()).cloned() else {
            // Connected only by a driver event; nothing of ours to release.
            self.registry.set_connected(BACKEND, false);
            return Ok(());
        };

        self.registry.set_closing(BACKEND, true);
        let released = match self.release_timeout {
            Some(limit) => match tokio::time::timeout(limit, session.disconnect()).await {
                Ok(result) => result,
                Err(_) => Err(format!("disconnect did not finish within {:?}", limit).into()),
            },
            None => session.disconnect().await,
        };

        let result = match released {
            Ok(()) => {
                // Retire the observer before dropping the session so late
                // driver events cannot flip the flag back.
                self.generation.fetch_add(1, Ordering::SeqCst);
                self.registry.set_resource(BACKEND, None);
                self.registry.set_connected(BACKEND, false);
                tracing::info!("MongoDB connection closed");
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "Error closing MongoDB connection");
                Err(FleetDbError::shutdown(BACKEND, err))
            }
        };
        self.registry.set_closing(BACKEND, false);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDocumentDriver;

    const URI: &str = "mongodb://sim.invalid:27017";

    fn manager() -> (Arc<ConnectionRegistry>, SimDocumentDriver, DocumentStoreManager) {
        let registry = Arc::new(ConnectionRegistry::new());
        let driver = SimDocumentDriver::new();
        let manager = DocumentStoreManager::new(Arc::clone(&registry), Arc::new(driver.clone()));
        (registry, driver, manager)
    }

    #[tokio::test]
    async fn collection_before_connect_fails() {
        let (_registry, _driver, manager) = manager();
        for name in [DATA_COLLECTION, PARAMETERS_COLLECTION, "anything"] {
            let err = manager.get_collection(name).unwrap_err();
            assert!(matches!(err, FleetDbError::ConnectionNotEstablished { .. }));
        }
    }

    #[tokio::test]
    async fn connect_then_collections() {
        let (registry, driver, manager) = manager();
        manager.connect(URI, "fleetdb", Duration::from_secs(5)).await.unwrap();

        assert!(registry.is_connected(BACKEND));
        assert_eq!(driver.connects(), 1);
        assert_eq!(manager.parameters_collection().unwrap().name(), "parametros");
        assert_eq!(manager.data_collection().unwrap().name(), "datos");
    }

    #[tokio::test]
    async fn connect_is_noop_when_connected() {
        let (_registry, driver, manager) = manager();
        manager.connect(URI, "fleetdb", Duration::from_secs(5)).await.unwrap();
        manager.connect(URI, "fleetdb", Duration::from_secs(5)).await.unwrap();
        assert_eq!(driver.connects(), 1);
    }

    #[tokio::test]
    async fn connect_is_noop_when_closing() {
        let (registry, driver, manager) = manager();
        registry.set_closing(BACKEND, true);
        manager.connect(URI, "fleetdb", Duration::from_secs(5)).await.unwrap();
        assert_eq!(driver.connects(), 0);
        assert!(!registry.is_connected(BACKEND));
    }

    #[tokio::test]
    async fn concurrent_connects_open_one_session() {
        let (_registry, driver, manager) = manager();
        driver.set_connect_delay(Duration::from_millis(20));
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager.connect(URI, "fleetdb", Duration::from_secs(5)).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(driver.connects(), 1);
    }

    #[tokio::test]
    async fn failed_connect_leaves_flag_untouched() {
        let (registry, driver, manager) = manager();
        driver.set_fail_connect(true);

        let err = manager
            .connect(URI, "fleetdb", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetDbError::Initialization { .. }));
        assert!(!registry.is_connected(BACKEND));
        assert!(registry.resource(BACKEND).is_none());
    }

    #[tokio::test]
    async fn connect_times_out() {
        let (registry, driver, manager) = manager();
        driver.set_connect_delay(Duration::from_millis(500));

        let err = manager
            .connect(URI, "fleetdb", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetDbError::Initialization { .. }));
        assert!(!registry.is_connected(BACKEND));
    }

    #[tokio::test]
    async fn failed_connect_undoes_driver_reported_connection() {
        let (registry, driver, manager) = manager();
        driver.set_events_during_connect(vec![ConnectivityEvent::Connected]);
        driver.set_fail_connect(true);

        let err = manager
            .connect(URI, "fleetdb", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetDbError::Initialization { .. }));
        assert!(!registry.is_connected(BACKEND));
        assert!(registry.resource(BACKEND).is_none());

        // Late events from the failed attempt are ignored.
        driver.emit(ConnectivityEvent::Connected);
        assert!(!registry.is_connected(BACKEND));

        // A retry really connects instead of no-opping.
        driver.set_events_during_connect(Vec::new());
        driver.set_fail_connect(false);
        manager.connect(URI, "fleetdb", Duration::from_secs(5)).await.unwrap();
        assert_eq!(driver.connects(), 1);
        assert!(manager.data_collection().is_ok());
    }

    #[tokio::test]
    async fn timed_out_connect_undoes_driver_reported_connection() {
        let (registry, driver, manager) = manager();
        driver.set_events_during_connect(vec![ConnectivityEvent::Connected]);
        driver.set_connect_delay(Duration::from_millis(500));

        manager
            .connect(URI, "fleetdb", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(!registry.is_connected(BACKEND));
        assert!(manager.get_collection(DATA_COLLECTION).is_err());
    }

    #[tokio::test]
    async fn driver_events_are_mirrored() {
        let (registry, driver, manager) = manager();
        manager.connect(URI, "fleetdb", Duration::from_secs(5)).await.unwrap();

        driver.emit(ConnectivityEvent::Disconnected);
        assert!(!registry.is_connected(BACKEND));
        assert!(manager.get_collection(DATA_COLLECTION).is_err());

        driver.emit(ConnectivityEvent::Connected);
        assert!(registry.is_connected(BACKEND));
        assert!(manager.get_collection(DATA_COLLECTION).is_ok());
    }

    #[tokio::test]
    async fn close_disconnects_once_and_ignores_late_events() {
        let (registry, driver, manager) = manager();
        manager.connect(URI, "fleetdb", Duration::from_secs(5)).await.unwrap();

        manager.close().await.unwrap();
        manager.close().await.unwrap();
        assert_eq!(driver.disconnects(), 1);

        driver.emit(ConnectivityEvent::Connected);
        let state = registry.get(BACKEND);
        assert!(!state.connected);
        assert!(!state.closing);
        assert!(state.resource.is_none());
    }

    #[tokio::test]
    async fn close_releases_session_after_driver_disconnect() {
        let (registry, driver, manager) = manager();
        manager.connect(URI, "fleetdb", Duration::from_secs(5)).await.unwrap();
        driver.emit(ConnectivityEvent::Disconnected);

        manager.close().await.unwrap();
        assert_eq!(driver.disconnects(), 1);
        assert!(registry.resource(BACKEND).is_none());
    }

    #[tokio::test]
    async fn failed_close_resets_closing() {
        let (registry, driver, manager) = manager();
        manager.connect(URI, "fleetdb", Duration::from_secs(5)).await.unwrap();
        driver.set_fail_disconnect(true);

        let err = manager.close().await.unwrap_err();
        assert!(matches!(err, FleetDbError::Shutdown { .. }));
        assert!(!registry.is_closing(BACKEND));
        assert!(registry.is_connected(BACKEND));

        driver.set_fail_disconnect(false);
        manager.close().await.unwrap();
        assert!(!registry.is_connected(BACKEND));
        assert_eq!(driver.disconnects(), 2);
    }
}
