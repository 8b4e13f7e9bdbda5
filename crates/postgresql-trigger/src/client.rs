//! PostgreSQL client utilities

use anyhow::{Context, Result};
use futures::{stream, StreamExt};
use log::error;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_postgres::{AsyncMessage, Client, NoTls, Notification};

/// Create a new PostgreSQL client with connection handling
pub async fn new_postgresql_client(connection_string: &str) -> Result<Arc<Mutex<Client>>> {
    let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
        .await
        .context("Failed to connect to PostgreSQL")?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("PostgreSQL connection error: {e}");
        }
    });

    Ok(Arc::new(Mutex::new(client)))
}

/// Connect and forward every asynchronous notification to the returned
/// receiver. The receiver closes when the connection ends.
pub async fn new_notification_client(
    connection_string: &str,
) -> Result<(Client, mpsc::UnboundedReceiver<Notification>)> {
    let (client, mut connection) = tokio_postgres::connect(connection_string, NoTls)
        .await
        .context("Failed to connect to PostgreSQL")?;

    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut messages = stream::poll_fn(move |cx| connection.poll_message(cx));
        while let Some(message) = messages.next().await {
            match message {
                Ok(AsyncMessage::Notification(notification)) => {
                    if tx.send(notification).is_err() {
                        break;
                    }
                }
                Ok(AsyncMessage::Notice(notice)) => {
                    log::debug!("PostgreSQL notice: {notice}");
                }
                Ok(_) => {}
                Err(e) => {
                    error!("PostgreSQL connection error: {e}");
                    break;
                }
            }
        }
    });

    Ok((client, rx))
}
