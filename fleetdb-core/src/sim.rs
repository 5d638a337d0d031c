//! In-memory drivers for tests
//!
//! `SimConnector` and `SimDocumentDriver` stand in for PostgreSQL and MongoDB.
//! They count every pool build, release, connect and disconnect, and expose
//! knobs to inject latency and failures so lifecycle races can be exercised
//! without a database.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::Document;
use mongodb::options::ClientOptions;
use mongodb::Client;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::document::{
    CollectionHandle, ConnectTarget, ConnectivityEvent, ConnectivityObserver, DocumentDriver,
    DocumentSession,
};
use crate::error::DriverError;
use crate::relational::{RelationalConnector, RelationalPool, RowSet};

// ============================================================================
// Relational
// ============================================================================

#[derive(Debug, Default)]
struct RelationalSimState {
    pools_built: AtomicUsize,
    pool_closes: AtomicUsize,
    fail_close: AtomicBool,
    build_delay: Mutex<Option<Duration>>,
    close_delay: Mutex<Option<Duration>>,
    query_delay: Mutex<Option<Duration>>,
    failing_fragment: Mutex<Option<String>>,
    rows_affected: Mutex<Option<usize>>,
    executed: Mutex<Vec<String>>,
}

/// Builds [`SimPool`]s that share one set of counters.
#[derive(Debug, Clone, Default)]
pub struct SimConnector {
    state: Arc<RelationalSimState>,
}

impl SimConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pools_built(&self) -> usize {
        self.state.pools_built.load(Ordering::SeqCst)
    }

    pub fn pool_closes(&self) -> usize {
        self.state.pool_closes.load(Ordering::SeqCst)
    }

    /// Statements executed so far, in completion order.
    pub fn executed(&self) -> Vec<String> {
        self.state.executed.lock().clone()
    }

    pub fn set_build_delay(&self, delay: Duration) {
        *self.state.build_delay.lock() = Some(delay);
    }

    pub fn set_close_delay(&self, delay: Duration) {
        *self.state.close_delay.lock() = Some(delay);
    }

    pub fn set_query_delay(&self, delay: Duration) {
        *self.state.query_delay.lock() = Some(delay);
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Any statement containing `fragment` fails like a syntax error.
    pub fn fail_queries_containing(&self, fragment: impl Into<String>) {
        *self.state.failing_fragment.lock() = Some(fragment.into());
    }

    pub fn clear_query_failures(&self) {
        *self.state.failing_fragment.lock() = None;
    }

    /// Count reported by `INSERT`/`UPDATE`/`DELETE` without `RETURNING`
    /// (default 1).
    pub fn set_rows_affected(&self, count: usize) {
        *self.state.rows_affected.lock() = Some(count);
    }
}

fn is_plain_dml(text: &str) -> bool {
    let upper = text.trim_start().to_ascii_uppercase();
    ["INSERT", "UPDATE", "DELETE"]
        .iter()
        .any(|verb| upper.starts_with(verb))
        && !upper.contains("RETURNING")
}

#[async_trait]
impl RelationalConnector for SimConnector {
    async fn build_pool(&self) -> Result<Arc<dyn RelationalPool>, DriverError> {
        let delay = *self.state.build_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.pools_built.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SimPool {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Pool that answers queries with a single echo row and plain DML with an
/// affected-row count.
///
/// Like sqlx, `close()` marks the pool closed before it starts draining.
#[derive(Debug, Default)]
pub struct SimPool {
    state: Arc<RelationalSimState>,
    closed: AtomicBool,
}

#[async_trait]
impl RelationalPool for SimPool {
    async fn execute(&self, text: &str, params: &[Value]) -> Result<RowSet, DriverError> {
        if self.is_closed() {
            return Err("attempted to acquire a connection on a closed pool".into());
        }
        let delay = *self.state.query_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self.state.failing_fragment.lock().clone();
        if let Some(fragment) = failing {
            if text.contains(&fragment) {
                return Err(format!("syntax error at or near \"{}\"", fragment.trim()).into());
            }
        }

        self.state.executed.lock().push(text.to_string());
        if is_plain_dml(text) {
            let affected = (*self.state.rows_affected.lock()).unwrap_or(1);
            return Ok(RowSet::with_row_count(Vec::new(), affected));
        }
        Ok(RowSet::new(vec![json!({ "statement": text, "params": params })]))
    }

    async fn close(&self) -> Result<(), DriverError> {
        // Injected failures happen before the pool stops accepting work.
        if self.state.fail_close.load(Ordering::SeqCst) {
            self.state.pool_closes.fetch_add(1, Ordering::SeqCst);
            return Err("pool release failed".into());
        }
        self.closed.store(true, Ordering::SeqCst);
        let delay = *self.state.close_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.pool_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Document
// ============================================================================

#[derive(Default)]
struct DocumentSimState {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    fail_connect: AtomicBool,
    fail_disconnect: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    disconnect_delay: Mutex<Option<Duration>>,
    events_during_connect: Mutex<Vec<ConnectivityEvent>>,
    observer: Mutex<Option<Arc<dyn ConnectivityObserver>>>,
}

/// Document driver whose sessions never touch the network.
///
/// Collections are handed out from a lazily constructed client, so they can
/// be named and inspected but not queried.
#[derive(Clone, Default)]
pub struct SimDocumentDriver {
    state: Arc<DocumentSimState>,
}

impl SimDocumentDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_disconnect(&self, fail: bool) {
        self.state.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = Some(delay);
    }

    pub fn set_disconnect_delay(&self, delay: Duration) {
        *self.state.disconnect_delay.lock() = Some(delay);
    }

    /// Events reported to the observer as soon as an attempt starts, before
    /// any connect delay or injected failure.
    pub fn set_events_during_connect(&self, events: Vec<ConnectivityEvent>) {
        *self.state.events_during_connect.lock() = events;
    }

    /// Deliver a connectivity notification to the most recent observer.
    pub fn emit(&self, event: ConnectivityEvent) {
        let observer = self.state.observer.lock().clone();
        if let Some(observer) = observer {
            observer.on_event(event);
        }
    }
}

#[async_trait]
impl DocumentDriver for SimDocumentDriver {
    async fn connect(
        &self,
        target: &ConnectTarget,
        observer: Arc<dyn ConnectivityObserver>,
    ) -> Result<Arc<dyn DocumentSession>, DriverError> {
        *self.state.observer.lock() = Some(Arc::clone(&observer));
        let events = self.state.events_during_connect.lock().clone();
        for event in events {
            observer.on_event(event);
        }

        let delay = *self.state.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err("Server selection timeout: No available servers".into());
        }

        let options = ClientOptions::parse(&target.uri).await?;
        let client = Client::with_options(options)?;
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(SimSession {
            state: Arc::clone(&self.state),
            database: client.database(&target.database),
        }))
    }
}

struct SimSession {
    state: Arc<DocumentSimState>,
    database: mongodb::Database,
}

#[async_trait]
impl DocumentSession for SimSession {
    fn collection(&self, name: &str) -> CollectionHandle {
        self.database.collection::<Document>(name)
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        let delay = *self.state.disconnect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_disconnect.load(Ordering::SeqCst) {
            return Err("disconnect failed".into());
        }
        Ok(())
    }
}
