//! Decoding of trigger notifications.

use livequery_core::value::unwrap_json_strings;
use livequery_core::{split_moves, ChangeType, Row, SyncMessage, SyncPayload};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RefPair {
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub old_ref: Option<String>,
}

/// One notification as published by the generated trigger function.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChangeNotification {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub table: String,
    #[serde(default)]
    pub id: Option<Value>,
    /// Full row for added/removed, changed fields for modified
    #[serde(default)]
    pub data: Option<Row>,
    #[serde(default)]
    pub refs: Vec<RefPair>,
    #[serde(default)]
    pub new_doc: Option<Row>,
}

impl ChangeNotification {
    /// Parse a notification payload.
    ///
    /// Returns `None` for anything that is not a well-formed change, including
    /// non-removal notifications without data. The channel is shared, so
    /// foreign payloads are expected and not an error.
    pub fn decode(payload: &str) -> Option<Self> {
        let notification: ChangeNotification = match serde_json::from_str(payload) {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("Dropping malformed notification: {e}");
                return None;
            }
        };
        if notification.change_type != ChangeType::Removed && notification.data.is_none() {
            tracing::debug!(
                "Dropping {:?} notification on '{}' without data",
                notification.change_type,
                notification.table
            );
            return None;
        }
        Some(notification)
    }

    /// One payload per carried reference pair.
    pub fn into_payloads(self) -> Vec<SyncPayload> {
        let data = self.data.map(unwrap_json_strings);
        let new_doc = self.new_doc.map(unwrap_json_strings);

        let (old_data, new_data, changes) = match self.change_type {
            ChangeType::Added => (None, data, None),
            ChangeType::Removed => (data, None, None),
            ChangeType::Modified => (None, new_doc.or_else(|| data.clone()), data),
        };

        self.refs
            .into_iter()
            .map(|pair| {
                let (old_ref, new_ref) = match self.change_type {
                    ChangeType::Added => (None, pair.reference),
                    ChangeType::Removed => (pair.reference, None),
                    ChangeType::Modified => (pair.old_ref, pair.reference),
                };
                SyncPayload {
                    change_type: self.change_type,
                    table: self.table.clone(),
                    id: self.id.clone(),
                    old_ref,
                    new_ref,
                    old_data: old_data.clone(),
                    new_data: new_data.clone(),
                    changes: changes.clone(),
                }
            })
            .collect()
    }

    pub fn into_messages(self) -> Vec<SyncMessage> {
        split_moves(self.into_payloads())
    }
}
