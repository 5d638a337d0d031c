//! Relational store: lazily created pool and parameterized queries
//!
//! The pool is a singleton per process. Creation and teardown go through a
//! per-backend async mutex so the "no pool and not closing, create one"
//! check cannot interleave with another creator or with `close()`.
//! Queries only take that mutex when no pool exists yet.

pub mod postgres;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::backend::{BackendKind, BackendResource};
use crate::error::{DriverError, FleetDbError, Result};
use crate::registry::ConnectionRegistry;

pub use postgres::{PgConnector, PgPoolHandle};

const BACKEND: BackendKind = BackendKind::Relational;

/// Result of one statement
///
/// `rows` holds one JSON object per returned row keyed by column name.
/// `row_count` is the number of rows the statement processed as reported
/// by the server, so an `UPDATE` or `DELETE` without `RETURNING` has no
/// `rows` but a non-zero `row_count` when it matched anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowSet {
    pub rows: Vec<Value>,
    pub row_count: usize,
}

impl RowSet {
    /// Rows of a query whose processed count equals the rows returned.
    pub fn new(rows: Vec<Value>) -> Self {
        let row_count = rows.len();
        Self { rows, row_count }
    }

    pub fn with_row_count(rows: Vec<Value>, row_count: usize) -> Self {
        Self { rows, row_count }
    }

    pub fn first(&self) -> Option<&Value> {
        self.rows.first()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A live connection pool.
#[async_trait]
pub trait RelationalPool: Send + Sync {
    /// Acquire a connection and run one statement with positional params.
    async fn execute(&self, text: &str, params: &[Value]) -> std::result::Result<RowSet, DriverError>;

    /// Stop handing out connections and wait for checked-out ones to return.
    async fn close(&self) -> std::result::Result<(), DriverError>;

    /// True once `close()` has begun, even if it has not finished draining.
    /// A closed pool never hands out connections again.
    fn is_closed(&self) -> bool;
}

/// Builds pools from connection configuration.
#[async_trait]
pub trait RelationalConnector: Send + Sync {
    async fn build_pool(&self) -> std::result::Result<Arc<dyn RelationalPool>, DriverError>;
}

pub struct RelationalPoolManager {
    registry: Arc<ConnectionRegistry>,
    connector: Arc<dyn RelationalConnector>,
    lifecycle: Mutex<()>,
    release_timeout: Option<Duration>,
    pools_built: AtomicUsize,
}

impl RelationalPoolManager {
    pub fn new(registry: Arc<ConnectionRegistry>, connector: Arc<dyn RelationalConnector>) -> Self {
        Self {
            registry,
            connector,
            lifecycle: Mutex::new(()),
            release_timeout: None,
            pools_built: AtomicUsize::new(0),
        }
    }

    /// Bound how long `close()` waits for in-flight queries to drain.
    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = Some(timeout);
        self
    }

    /// Number of pools this manager has constructed over its lifetime.
    pub fn pools_built(&self) -> usize {
        self.pools_built.load(Ordering::SeqCst)
    }

    /// The stored pool, unless it has already been closed.
    fn current_pool(&self) -> Option<Arc<dyn RelationalPool>> {
        self.registry
            .resource(BACKEND)
            .and_then(|resource| resource.as_pool().cloned())
            .filter(|pool| !pool.is_closed())
    }

    /// Return the live pool, constructing it on first use.
    ///
    /// Fails with [`FleetDbError::TransientUnavailable`] while the pool is
    /// being torn down.
    pub async fn ensure_pool(&self) -> Result<Arc<dyn RelationalPool>> {
        if self.registry.is_closing(BACKEND) {
            return Err(FleetDbError::unavailable(BACKEND));
        }
        if let Some(pool) = self.current_pool() {
            return Ok(pool);
        }

        let _guard = self.lifecycle.lock().await;

        // Re-check under the guard: another caller may have built it, or a
        // teardown may have started while we waited.
        if self.registry.is_closing(BACKEND) {
            return Err(FleetDbError::unavailable(BACKEND));
        }
        if let Some(pool) = self.current_pool() {
            return Ok(pool);
        }

        let pool = self.connector.build_pool().await.map_err(FleetDbError::query)?;
        self.pools_built.fetch_add(1, Ordering::SeqCst);
        self.registry
            .set_resource(BACKEND, Some(BackendResource::Pool(Arc::clone(&pool))));
        tracing::debug!(backend = %BACKEND, "connection pool created");
        Ok(pool)
    }

    /// Run a parameterized statement.
    ///
    /// Parameters are bound with the type of their JSON value: a string is
    /// bound as `text`, so comparing it against an integer column fails.
    /// Pass numbers as JSON numbers or cast in SQL (`WHERE id = $1::int`).
    ///
    /// Success marks the backend connected; any failure marks it
    /// disconnected until the next successful query.
    pub async fn query(&self, text: &str, params: &[Value]) -> Result<RowSet> {
        let pool = self.ensure_pool().await.inspect_err(|err| {
            if !err.is_transient() {
                self.registry.set_connected(BACKEND, false);
            }
        })?;

        match pool.execute(text, params).await {
            Ok(rows) => {
                self.registry.set_connected(BACKEND, true);
                Ok(rows)
            }
            Err(err) => {
                self.registry.set_connected(BACKEND, false);
                tracing::error!(backend = %BACKEND, error = %err, "PostgreSQL query error");
                Err(FleetDbError::query(err))
            }
        }
    }

    /// Release the pool if one exists.
    ///
    /// `closing` is always reset before returning. If the release fails
    /// before the pool stopped accepting work, the handle is kept so a later
    /// call can retry. A pool that was already closed is dropped either way
    /// and the next query builds a fresh one.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let Some(pool) = self
            .registry
            .resource(BACKEND)
            .and_then(|resource| resource.as_pool().cloned())
        else {
            return Ok(());
        };
        if self.registry.is_closing(BACKEND) {
            return Ok(());
        }

        self.registry.set_closing(BACKEND, true);
        let released = match self.release_timeout {
            Some(limit) => match tokio::time::timeout(limit, pool.close()).await {
                Ok(result) => result,
                Err(_) => Err(format!("pool did not drain within {:?}", limit).into()),
            },
            None => pool.close().await,
        };

        let result = match released {
            Ok(()) => {
                self.registry.set_resource(BACKEND, None);
                self.registry.set_connected(BACKEND, false);
                tracing::info!("PostgreSQL connection pool closed");
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "Error closing PostgreSQL pool");
                if pool.is_closed() {
                    // Remaining connections finish on their own.
                    self.registry.set_resource(BACKEND, None);
                    self.registry.set_connected(BACKEND, false);
                }
                Err(FleetDbError::shutdown(BACKEND, err))
            }
        };
        self.registry.set_closing(BACKEND, false);
        result
    }
}
