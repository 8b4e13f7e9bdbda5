//! Change streams → raw change events.
//!
//! One database-level change stream per logical connection. Events on
//! collections that are not realtime are skipped. Delete events only carry
//! the document key unless pre-images are enabled on the collection.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use bson::Document;
use futures::StreamExt;
use livequery_core::{ChangeType, FanoutEngine, RawChangeEvent, Row, RouteRegistry, SyncMessage, IDENTITY_FIELD};
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType};
use mongodb::options::{ChangeStreamOptions, FullDocumentBeforeChangeType, FullDocumentType};
use mongodb::Database;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::convert::{bson_to_json, document_to_row, NATIVE_ID_FIELD};

/// The parts of a change stream event the engine needs.
#[derive(Debug, Clone, Default)]
pub struct ChangeParts {
    pub collection: Option<String>,
    pub document_key: Option<Document>,
    pub full_document: Option<Document>,
    pub before_change: Option<Document>,
    pub updated_fields: Option<Document>,
}

impl From<ChangeStreamEvent<Document>> for ChangeParts {
    fn from(event: ChangeStreamEvent<Document>) -> Self {
        Self {
            collection: event.ns.and_then(|ns| ns.coll),
            document_key: event.document_key,
            full_document: event.full_document,
            before_change: event.full_document_before_change,
            updated_fields: event.update_description.map(|d| d.updated_fields),
        }
    }
}

/// Whether an update arrived without the before-image needed to detect
/// that the row left a reference.
pub fn lacks_pre_image(operation: &OperationType, parts: &ChangeParts) -> bool {
    matches!(operation, OperationType::Update | OperationType::Replace)
        && parts.before_change.is_none()
}

/// Convert one change. Operations other than insert, update, replace and
/// delete yield `None`.
pub fn convert_change(operation: &OperationType, parts: ChangeParts) -> Option<RawChangeEvent> {
    let change_type = match operation {
        OperationType::Insert => ChangeType::Added,
        OperationType::Update | OperationType::Replace => ChangeType::Modified,
        OperationType::Delete => ChangeType::Removed,
        other => {
            debug!("Skipping change stream operation {other:?}");
            return None;
        }
    };

    let table = parts.collection?;
    let id = parts
        .document_key
        .as_ref()
        .and_then(|key| key.get(NATIVE_ID_FIELD))
        .cloned()
        .map(bson_to_json);

    let key_only = || {
        let mut row = Row::new();
        if let Some(id) = &id {
            row.insert(IDENTITY_FIELD.to_string(), id.clone());
        }
        row
    };

    let old_data = match change_type {
        ChangeType::Added => None,
        ChangeType::Modified => parts.before_change.map(document_to_row),
        ChangeType::Removed => Some(parts.before_change.map(document_to_row).unwrap_or_else(key_only)),
    };
    let new_data = match change_type {
        ChangeType::Removed => None,
        _ => Some(parts.full_document.map(document_to_row).unwrap_or_else(key_only)),
    };
    let changes = match change_type {
        ChangeType::Modified => parts.updated_fields.map(document_to_row),
        _ => None,
    };

    Some(RawChangeEvent {
        table,
        change_type,
        id,
        changes,
        old_data,
        new_data,
    })
}

pub struct ChangeStreamListener {
    connection: String,
    database: Database,
}

impl ChangeStreamListener {
    pub fn new(connection: &str, database: Database) -> Self {
        Self {
            connection: connection.to_string(),
            database,
        }
    }

    /// Watch the database and forward sync messages until the stream ends.
    pub async fn run(
        self,
        registry: Arc<RouteRegistry>,
        sender: broadcast::Sender<SyncMessage>,
    ) -> Result<()> {
        let collections: Vec<String> = registry
            .realtime_entities(&self.connection)
            .into_iter()
            .map(str::to_string)
            .collect();

        let options = ChangeStreamOptions::builder()
            .full_document(Some(FullDocumentType::UpdateLookup))
            .full_document_before_change(Some(FullDocumentBeforeChangeType::WhenAvailable))
            .build();

        let mut stream = self
            .database
            .watch()
            .with_options(options)
            .await
            .with_context(|| format!("Opening change stream for connection '{}'", self.connection))?;
        info!(
            "Watching {} collections on database '{}' for connection '{}'",
            collections.len(),
            self.database.name(),
            self.connection
        );

        let engine = FanoutEngine::new(&registry, &self.connection);
        let mut warned: HashSet<String> = HashSet::new();
        while let Some(event) = stream.next().await {
            let event = event.context("MongoDB change stream error")?;
            let operation = event.operation_type.clone();
            let parts = ChangeParts::from(event);
            let missing_pre_image = lacks_pre_image(&operation, &parts);
            let Some(change) = convert_change(&operation, parts) else {
                continue;
            };
            if !collections.contains(&change.table) {
                continue;
            }
            if missing_pre_image && warned.insert(change.table.clone()) {
                warn!(
                    "Collection '{}' has no pre-images; rows moved between references \
                     are not removed from the old reference. Enable \
                     changeStreamPreAndPostImages on the collection",
                    change.table
                );
            }
            for message in engine.fanout_messages(&change) {
                debug!(
                    "{:?} on '{}' ({})",
                    message.change_type, message.reference, message.table
                );
                let _ = sender.send(message);
            }
        }

        info!("Change stream for connection '{}' closed", self.connection);
        Ok(())
    }
}
