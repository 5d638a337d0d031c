//! MongoDB driver adapter
//!
//! Topology changes reported by the driver's SDAM monitor are translated
//! into [`ConnectivityEvent`]s: the deployment counts as connected while at
//! least one server is readable.

use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use mongodb::event::sdam::SdamEvent;
use mongodb::event::EventHandler;
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};

use super::{
    CollectionHandle, ConnectTarget, ConnectivityEvent, ConnectivityObserver, DocumentDriver,
    DocumentSession,
};
use crate::error::DriverError;

#[derive(Debug, Clone)]
pub struct MongoDriver {
    max_pool_size: u32,
    app_name: Option<String>,
}

impl MongoDriver {
    pub fn new(max_pool_size: u32) -> Self {
        Self {
            max_pool_size,
            app_name: None,
        }
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }
}

/// Map one SDAM event to a connectivity transition, if it is one.
fn translate(event: &SdamEvent) -> Option<ConnectivityEvent> {
    match event {
        SdamEvent::TopologyDescriptionChanged(change) => {
            let before = change.previous_description.has_readable_server(None);
            let after = change.new_description.has_readable_server(None);
            match (before, after) {
                (false, true) => Some(ConnectivityEvent::Connected),
                (true, false) => Some(ConnectivityEvent::Disconnected),
                _ => None,
            }
        }
        SdamEvent::TopologyClosed(_) => Some(ConnectivityEvent::Disconnected),
        _ => None,
    }
}

#[async_trait]
impl DocumentDriver for MongoDriver {
    async fn connect(
        &self,
        target: &ConnectTarget,
        observer: Arc<dyn ConnectivityObserver>,
    ) -> Result<Arc<dyn DocumentSession>, DriverError> {
        let mut options = ClientOptions::parse(&target.uri).await?;
        options.server_selection_timeout = Some(target.timeout);
        options.max_pool_size = Some(self.max_pool_size);
        if self.app_name.is_some() {
            options.app_name = self.app_name.clone();
        }
        options.sdam_event_handler = Some(EventHandler::callback(move |event: SdamEvent| {
            if let Some(change) = translate(&event) {
                observer.on_event(change);
            }
        }));

        let client = Client::with_options(options)?;
        let database = client.database(&target.database);

        // Client construction is lazy; ping forces server selection so an
        // unreachable deployment fails here rather than on first use.
        if let Err(err) = database.run_command(doc! { "ping": 1 }).await {
            client.shutdown().await;
            return Err(err.into());
        }

        Ok(Arc::new(MongoSession { client, database }))
    }
}

/// A connected MongoDB client bound to one database
#[derive(Debug, Clone)]
pub struct MongoSession {
    client: Client,
    database: Database,
}

impl MongoSession {
    pub fn database(&self) -> &Database {
        &self.database
    }
}

#[async_trait]
impl DocumentSession for MongoSession {
    fn collection(&self, name: &str) -> CollectionHandle {
        self.database.collection::<Document>(name)
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        // Waits for outstanding cursors and sessions to be dropped.
        self.client.clone().shutdown().await;
        Ok(())
    }
}
