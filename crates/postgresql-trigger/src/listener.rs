//! `LISTEN`-based change feed.
//!
//! One [`TriggerListener`] serves every realtime table of a logical
//! connection: it installs the notify triggers, subscribes to
//! [`NOTIFY_CHANNEL`] once and turns each notification into sync messages.

use anyhow::{Context, Result};
use livequery_core::{RouteRegistry, SyncMessage};
use log::{error, info};
use tokio::sync::{broadcast, mpsc};
use tokio_postgres::{Client, Notification};

use crate::client::new_notification_client;
use crate::notification::ChangeNotification;
use crate::trigger::{install_statements, quote_ident, NOTIFY_CHANNEL};

pub struct TriggerListener {
    connection: String,
    client: Client,
    notifications: mpsc::UnboundedReceiver<Notification>,
}

impl TriggerListener {
    pub async fn connect(connection: &str, uri: &str) -> Result<Self> {
        let (client, notifications) = new_notification_client(uri)
            .await
            .with_context(|| format!("Connection '{connection}'"))?;
        Ok(Self {
            connection: connection.to_string(),
            client,
            notifications,
        })
    }

    /// Install notify triggers on every realtime table of this connection.
    /// Returns the tables that were set up.
    pub async fn install_triggers(&self, registry: &RouteRegistry) -> Result<Vec<String>> {
        let tables: Vec<String> = registry
            .realtime_entities(&self.connection)
            .into_iter()
            .map(str::to_string)
            .collect();

        for table in &tables {
            info!("Installing change trigger on table: {table}");
            let templates = registry.realtime_templates(&self.connection, table);
            for statement in install_statements(table, templates) {
                if let Err(e) = self.client.batch_execute(&statement).await {
                    error!("Failed to install change trigger on {table}: {e}");
                    return Err(e).with_context(|| format!("Installing trigger on '{table}'"));
                }
            }
        }

        Ok(tables)
    }

    pub async fn listen(&self) -> Result<()> {
        self.client
            .batch_execute(&format!("LISTEN {}", quote_ident(NOTIFY_CHANNEL)))
            .await
            .context("LISTEN failed")?;
        info!(
            "Listening on channel '{NOTIFY_CHANNEL}' for connection '{}'",
            self.connection
        );
        Ok(())
    }

    /// Wait for the next notification on the change channel and expand it.
    ///
    /// Noise yields an empty vector. `None` once the connection is gone.
    pub async fn next_messages(&mut self) -> Option<Vec<SyncMessage>> {
        let notification = self.notifications.recv().await?;
        if notification.channel() != NOTIFY_CHANNEL {
            return Some(Vec::new());
        }
        Some(
            ChangeNotification::decode(notification.payload())
                .map(ChangeNotification::into_messages)
                .unwrap_or_default(),
        )
    }

    /// Forward sync messages to `sender` until the connection closes.
    pub async fn run(mut self, sender: broadcast::Sender<SyncMessage>) -> Result<()> {
        while let Some(messages) = self.next_messages().await {
            for message in messages {
                tracing::debug!(
                    "{:?} on '{}' ({})",
                    message.change_type,
                    message.reference,
                    message.table
                );
                // No subscribers is not an error
                let _ = sender.send(message);
            }
        }
        info!("Change feed for connection '{}' closed", self.connection);
        Ok(())
    }
}
