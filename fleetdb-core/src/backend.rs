//! Backend identifiers and the per-backend connectivity record

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::document::DocumentSession;
use crate::relational::RelationalPool;

/// The two data stores managed by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// PostgreSQL: drivers, trucks, categories, users
    Relational,
    /// MongoDB: telemetry and configuration parameters
    Document,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Relational, BackendKind::Document];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::Document => "document",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owning handle to a live pool or session.
#[derive(Clone)]
pub enum BackendResource {
    Pool(Arc<dyn RelationalPool>),
    Session(Arc<dyn DocumentSession>),
}

impl BackendResource {
    pub fn as_pool(&self) -> Option<&Arc<dyn RelationalPool>> {
        match self {
            Self::Pool(pool) => Some(pool),
            Self::Session(_) => None,
        }
    }

    pub fn as_session(&self) -> Option<&Arc<dyn DocumentSession>> {
        match self {
            Self::Session(session) => Some(session),
            Self::Pool(_) => None,
        }
    }
}

impl fmt::Debug for BackendResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool(_) => f.write_str("BackendResource::Pool"),
            Self::Session(_) => f.write_str("BackendResource::Session"),
        }
    }
}

/// Snapshot of one backend's connectivity.
#[derive(Debug, Clone, Default)]
pub struct BackendState {
    pub connected: bool,
    pub closing: bool,
    pub resource: Option<BackendResource>,
}

impl BackendState {
    pub fn has_resource(&self) -> bool {
        self.resource.is_some()
    }
}
