//! Change hub: one change-feed listener per logical connection, fanned out
//! to any number of subscribers.

use std::sync::Arc;

use anyhow::{Context, Result};
use livequery_core::{DbFamily, RouteRegistry, SyncMessage};
use livequery_mongodb_changestream::{new_mongodb_database, ChangeStreamListener};
use livequery_postgresql_trigger::TriggerListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{ConnectionConfig, LivequeryConfig};

/// Broadcast bus for sync messages.
///
/// A subscriber that falls more than `capacity` messages behind loses the
/// oldest ones and sees `RecvError::Lagged`.
pub struct ChangeHub {
    sender: broadcast::Sender<SyncMessage>,
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
        self.sender.subscribe()
    }

    pub fn publish(&self, message: SyncMessage) {
        // No subscribers is not an error
        let _ = self.sender.send(message);
    }

    pub fn sender(&self) -> broadcast::Sender<SyncMessage> {
        self.sender.clone()
    }

    /// Start one listener for every connection that serves a realtime entity.
    ///
    /// PostgreSQL triggers are installed first unless `install_triggers` is
    /// false. Returns the spawned listener tasks.
    pub async fn start(
        &self,
        config: &LivequeryConfig,
        registry: Arc<RouteRegistry>,
        install_triggers: bool,
    ) -> Result<Vec<JoinHandle<Result<()>>>> {
        let mut handles = Vec::new();

        for connection in &config.connections {
            if registry.realtime_entities(&connection.name).is_empty() {
                continue;
            }
            let handle = self
                .start_connection(connection, registry.clone(), install_triggers)
                .await
                .with_context(|| format!("Starting change feed for '{}'", connection.name))?;
            handles.push(handle);
        }

        tracing::info!("Started {} change feed listeners", handles.len());
        Ok(handles)
    }

    async fn start_connection(
        &self,
        connection: &ConnectionConfig,
        registry: Arc<RouteRegistry>,
        install_triggers: bool,
    ) -> Result<JoinHandle<Result<()>>> {
        let sender = self.sender();

        match connection.family {
            DbFamily::Relational => {
                let listener = TriggerListener::connect(&connection.name, &connection.uri).await?;
                if install_triggers {
                    let tables = listener.install_triggers(&registry).await?;
                    tracing::info!(
                        "Installed change triggers on {} tables for '{}'",
                        tables.len(),
                        connection.name
                    );
                }
                listener.listen().await?;
                Ok(tokio::spawn(listener.run(sender)))
            }
            DbFamily::Document => {
                let database =
                    new_mongodb_database(&connection.uri, connection.database.as_deref()).await?;
                let listener = ChangeStreamListener::new(&connection.name, database);
                Ok(tokio::spawn(listener.run(registry, sender)))
            }
        }
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(1024)
    }
}
