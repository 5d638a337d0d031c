//! Connection registry - single source of truth for backend status
//!
//! Holds one [`BackendState`] per [`BackendKind`]. Every mutation touches a
//! single field and the last writer wins; the managers enforce the
//! lifecycle invariants, not the registry.

use parking_lot::RwLock;
use serde::Serialize;

use crate::backend::{BackendKind, BackendResource, BackendState};

/// Connectivity flags reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionStatus {
    pub relational_connected: bool,
    pub document_connected: bool,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    relational: RwLock<BackendState>,
    document: RwLock<BackendState>,
}

impl ConnectionRegistry {
    /// Both backends start disconnected, not closing, with no resource.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, backend: BackendKind) -> &RwLock<BackendState> {
        match backend {
            BackendKind::Relational => &self.relational,
            BackendKind::Document => &self.document,
        }
    }

    pub fn get(&self, backend: BackendKind) -> BackendState {
        self.slot(backend).read().clone()
    }

    pub fn is_connected(&self, backend: BackendKind) -> bool {
        self.slot(backend).read().connected
    }

    pub fn is_closing(&self, backend: BackendKind) -> bool {
        self.slot(backend).read().closing
    }

    pub fn resource(&self, backend: BackendKind) -> Option<BackendResource> {
        self.slot(backend).read().resource.clone()
    }

    pub fn set_connected(&self, backend: BackendKind, connected: bool) {
        let mut state = self.slot(backend).write();
        if state.connected != connected {
            tracing::debug!(backend = %backend, connected, "connectivity changed");
        }
        state.connected = connected;
    }

    pub fn set_closing(&self, backend: BackendKind, closing: bool) {
        self.slot(backend).write().closing = closing;
    }

    pub fn set_resource(&self, backend: BackendKind, resource: Option<BackendResource>) {
        self.slot(backend).write().resource = resource;
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            relational_connected: self.is_connected(BackendKind::Relational),
            document_connected: self.is_connected(BackendKind::Document),
        }
    }
}
