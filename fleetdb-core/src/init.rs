//! Startup probing of both backends
//!
//! Fail-fast: a single failed probe is fatal. The sequencer only reports
//! the failure; tearing down and exiting is the caller's job so both
//! shutdown triggers (signal, failed startup) go through one coordinator.

use std::sync::Arc;

use crate::backend::BackendKind;
use crate::config::DocumentConfig;
use crate::document::DocumentStoreManager;
use crate::error::{FleetDbError, Result};
use crate::relational::RelationalPoolManager;

/// Round trip used to verify the relational store is reachable
pub const RELATIONAL_PROBE: &str = "SELECT NOW()";

pub struct InitializationSequencer {
    relational: Arc<RelationalPoolManager>,
    document: Arc<DocumentStoreManager>,
    target: DocumentConfig,
}

impl InitializationSequencer {
    pub fn new(
        relational: Arc<RelationalPoolManager>,
        document: Arc<DocumentStoreManager>,
        target: DocumentConfig,
    ) -> Self {
        Self {
            relational,
            document,
            target,
        }
    }

    /// Probe PostgreSQL, then connect MongoDB.
    ///
    /// Any failure comes back as [`FleetDbError::Initialization`].
    pub async fn run(&self) -> Result<()> {
        self.relational
            .query(RELATIONAL_PROBE, &[])
            .await
            .map_err(|err| FleetDbError::initialization(BackendKind::Relational, err))?;
        tracing::info!("PostgreSQL connected successfully");

        self.document
            .connect(
                &self.target.uri,
                &self.target.database,
                self.target.connect_timeout(),
            )
            .await?;

        Ok(())
    }
}
