//! Change fanout.
//!
//! Turns one row-level change into reference-scoped notifications:
//!
//! ```text
//! RawChangeEvent ──fanout──▶ SyncPayload (one per realtime template)
//!                             │
//!                             └─split_moves──▶ SyncMessage (added/modified/removed at one ref)
//! ```
//!
//! A modified row whose key fields changed leaves one reference and enters
//! another. [`split_moves`] turns that into a `removed` carrying only the
//! identifier at the old reference and an `added` carrying the full row at
//! the new one.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::route::RouteRegistry;
use crate::{Row, IDENTITY_FIELD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

/// One row-level mutation as reported by a change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChangeEvent {
    /// Table or collection name
    pub table: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(default)]
    pub id: Option<Value>,
    /// Fields whose value differs between the images (modified only)
    #[serde(default)]
    pub changes: Option<Row>,
    #[serde(default)]
    pub old_data: Option<Row>,
    #[serde(default)]
    pub new_data: Option<Row>,
}

/// A change bound to the old and new reference of one template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub table: String,
    pub id: Option<Value>,
    pub old_ref: Option<String>,
    pub new_ref: Option<String>,
    pub old_data: Option<Row>,
    /// Full after-image when known
    pub new_data: Option<Row>,
    /// Changed fields only (modified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Row>,
}

/// A change addressed to exactly one reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub table: String,
    pub data: Row,
}

/// Computes reference-scoped payloads from the registry's realtime index for
/// the tables of one connection.
#[derive(Debug, Clone, Copy)]
pub struct FanoutEngine<'a> {
    registry: &'a RouteRegistry,
    connection: &'a str,
}

impl<'a> FanoutEngine<'a> {
    pub fn new(registry: &'a RouteRegistry, connection: &'a str) -> Self {
        Self {
            registry,
            connection,
        }
    }

    /// One payload per realtime template of the event's table, in
    /// registration order. Tables nobody subscribes to yield nothing.
    ///
    /// A modified event without a before-image is assumed not to have moved:
    /// its old reference is taken to be the new one.
    pub fn fanout(&self, event: &RawChangeEvent) -> Vec<SyncPayload> {
        let templates = self.registry.realtime_templates(self.connection, &event.table);
        if templates.is_empty() {
            return Vec::new();
        }

        // Key fields may be missing from a partial after-image
        let merged = event.new_data.as_ref().map(|new_data| {
            let mut merged = event.old_data.clone().unwrap_or_default();
            merged.extend(new_data.clone());
            merged
        });

        let id = event.id.clone().or_else(|| {
            merged
                .as_ref()
                .or(event.old_data.as_ref())
                .and_then(|row| row.get(IDENTITY_FIELD).cloned())
        });

        templates
            .iter()
            .map(|template| {
                let old_ref = event
                    .old_data
                    .as_ref()
                    .and_then(|row| template.substitute(row).ok());
                let new_ref = merged
                    .as_ref()
                    .and_then(|row| template.substitute(row).ok());
                let old_ref = match (event.change_type, &event.old_data) {
                    (ChangeType::Modified, None) => new_ref.clone(),
                    _ => old_ref,
                };
                if old_ref.is_none() && new_ref.is_none() {
                    tracing::debug!(
                        "Change on '{}' cannot be bound to '{template}'",
                        event.table
                    );
                }
                SyncPayload {
                    change_type: event.change_type,
                    table: event.table.clone(),
                    id: id.clone(),
                    old_ref,
                    new_ref,
                    old_data: event.old_data.clone(),
                    new_data: merged.clone(),
                    changes: event.changes.clone(),
                }
            })
            .collect()
    }

    pub fn fanout_messages(&self, event: &RawChangeEvent) -> Vec<SyncMessage> {
        split_moves(self.fanout(event))
    }
}

fn with_id(mut row: Row, id: &Option<Value>) -> Row {
    if let Some(id) = id {
        row.entry(IDENTITY_FIELD.to_string())
            .or_insert_with(|| id.clone());
    }
    row
}

fn id_only(id: &Option<Value>) -> Row {
    with_id(Row::new(), id)
}

/// Expand payloads into per-reference messages, splitting moves.
pub fn split_moves(payloads: Vec<SyncPayload>) -> Vec<SyncMessage> {
    let mut out = Vec::with_capacity(payloads.len());

    for payload in payloads {
        let SyncPayload {
            change_type,
            table,
            id,
            old_ref,
            new_ref,
            old_data,
            new_data,
            changes,
        } = payload;

        let message = |reference: String, change_type: ChangeType, data: Row| SyncMessage {
            reference,
            change_type,
            table: table.clone(),
            data,
        };

        match change_type {
            ChangeType::Added => {
                if let Some(reference) = new_ref {
                    let data = with_id(new_data.unwrap_or_default(), &id);
                    out.push(message(reference, ChangeType::Added, data));
                }
            }
            ChangeType::Removed => {
                if let Some(reference) = old_ref.or(new_ref) {
                    let data = with_id(old_data.unwrap_or_default(), &id);
                    out.push(message(reference, ChangeType::Removed, data));
                }
            }
            ChangeType::Modified if old_ref == new_ref => {
                if let Some(reference) = new_ref {
                    let data = with_id(changes.or(new_data).unwrap_or_default(), &id);
                    out.push(message(reference, ChangeType::Modified, data));
                }
            }
            // Moved, possibly out of or into an unbound (NULL key) reference
            ChangeType::Modified => {
                if let Some(old_ref) = old_ref {
                    out.push(message(old_ref, ChangeType::Removed, id_only(&id)));
                }
                if let Some(new_ref) = new_ref {
                    let data = with_id(new_data.unwrap_or_default(), &id);
                    out.push(message(new_ref, ChangeType::Added, data));
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{DbFamily, RouteConfig};
    use serde_json::json;
    use std::collections::HashMap;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn registry() -> RouteRegistry {
        let connections = HashMap::from([("default".to_string(), DbFamily::Relational)]);
        let configs = vec![
            RouteConfig::new(&["users/:user_id/orders", "users/:user_id/orders/:id"], "orders")
                .realtime(),
            RouteConfig::new(&["shops/:shop_id/orders"], "orders").realtime(),
            RouteConfig::new(&["carts"], "carts"),
        ];
        RouteRegistry::register(&configs, &connections, "").unwrap()
    }

    #[test]
    fn test_unsubscribed_table_yields_nothing() {
        let registry = registry();
        let engine = FanoutEngine::new(&registry, "default");
        let event = RawChangeEvent {
            table: "carts".to_string(),
            change_type: ChangeType::Added,
            id: None,
            changes: None,
            old_data: None,
            new_data: Some(row(json!({"id": "c1"}))),
        };
        assert!(engine.fanout(&event).is_empty());
    }

    #[test]
    fn test_insert_fans_out_per_template() {
        let registry = registry();
        let engine = FanoutEngine::new(&registry, "default");
        let event = RawChangeEvent {
            table: "orders".to_string(),
            change_type: ChangeType::Added,
            id: None,
            changes: None,
            old_data: None,
            new_data: Some(row(json!({"id": "o1", "user_id": "u1", "shop_id": "s1"}))),
        };

        let payloads = engine.fanout(&event);
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].new_ref.as_deref(), Some("users/u1/orders"));
        assert_eq!(payloads[1].new_ref.as_deref(), Some("shops/s1/orders"));
        assert!(payloads.iter().all(|p| p.old_ref.is_none()));
        assert_eq!(payloads[0].id, Some(json!("o1")));
    }

    #[test]
    fn test_partial_after_image_resolves_from_before_image() {
        let registry = registry();
        let engine = FanoutEngine::new(&registry, "default");
        let event = RawChangeEvent {
            table: "orders".to_string(),
            change_type: ChangeType::Modified,
            id: Some(json!("o1")),
            changes: None,
            old_data: Some(row(json!({"id": "o1", "user_id": "u1", "shop_id": "s1", "total": 1}))),
            new_data: Some(row(json!({"total": 2}))),
        };

        let messages = engine.fanout_messages(&event);
        assert_eq!(messages.len(), 2);
        assert!(messages
            .iter()
            .all(|m| m.change_type == ChangeType::Modified));
        assert_eq!(messages[0].reference, "users/u1/orders");
        assert_eq!(messages[0].data["total"], json!(2));
    }

    #[test]
    fn test_move_splits_into_remove_and_add() {
        let registry = registry();
        let engine = FanoutEngine::new(&registry, "default");
        let event = RawChangeEvent {
            table: "orders".to_string(),
            change_type: ChangeType::Modified,
            id: Some(json!("o1")),
            changes: Some(row(json!({"user_id": "u2"}))),
            old_data: Some(row(json!({"id": "o1", "user_id": "u1", "shop_id": "s1", "total": 1}))),
            new_data: Some(row(json!({"id": "o1", "user_id": "u2", "shop_id": "s1", "total": 1}))),
        };

        let messages = engine.fanout_messages(&event);
        assert_eq!(messages.len(), 3);

        assert_eq!(messages[0].reference, "users/u1/orders");
        assert_eq!(messages[0].change_type, ChangeType::Removed);
        assert_eq!(messages[0].data, row(json!({"id": "o1"})));

        assert_eq!(messages[1].reference, "users/u2/orders");
        assert_eq!(messages[1].change_type, ChangeType::Added);
        assert_eq!(messages[1].data["total"], json!(1));
        assert_eq!(messages[1].data["shop_id"], json!("s1"));

        // The shop reference did not move
        assert_eq!(messages[2].reference, "shops/s1/orders");
        assert_eq!(messages[2].change_type, ChangeType::Modified);
        assert_eq!(messages[2].data, row(json!({"id": "o1", "user_id": "u2"})));
    }

    #[test]
    fn test_key_set_to_null_removes_from_old_ref() {
        let registry = registry();
        let engine = FanoutEngine::new(&registry, "default");
        let event = RawChangeEvent {
            table: "orders".to_string(),
            change_type: ChangeType::Modified,
            id: Some(json!("o1")),
            changes: Some(row(json!({"user_id": null}))),
            old_data: Some(row(json!({"id": "o1", "user_id": "u1", "total": 1}))),
            new_data: Some(row(json!({"id": "o1", "user_id": null, "total": 1}))),
        };

        let messages = engine.fanout_messages(&event);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].reference, "users/u1/orders");
        assert_eq!(messages[0].change_type, ChangeType::Removed);
        assert_eq!(messages[0].data, row(json!({"id": "o1"})));
    }

    #[test]
    fn test_key_set_from_null_adds_full_row() {
        let registry = registry();
        let engine = FanoutEngine::new(&registry, "default");
        let event = RawChangeEvent {
            table: "orders".to_string(),
            change_type: ChangeType::Modified,
            id: Some(json!("o1")),
            changes: Some(row(json!({"user_id": "u1"}))),
            old_data: Some(row(json!({"id": "o1", "user_id": null, "total": 7}))),
            new_data: Some(row(json!({"id": "o1", "user_id": "u1", "total": 7}))),
        };

        let messages = engine.fanout_messages(&event);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].reference, "users/u1/orders");
        assert_eq!(messages[0].change_type, ChangeType::Added);
        assert_eq!(messages[0].data["total"], json!(7));
    }

    #[test]
    fn test_update_without_before_image_stays_modified() {
        let registry = registry();
        let engine = FanoutEngine::new(&registry, "default");
        let event = RawChangeEvent {
            table: "orders".to_string(),
            change_type: ChangeType::Modified,
            id: Some(json!("o1")),
            changes: Some(row(json!({"total": 2}))),
            old_data: None,
            new_data: Some(row(json!({"id": "o1", "user_id": "u1", "total": 2}))),
        };

        let messages = engine.fanout_messages(&event);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].reference, "users/u1/orders");
        assert_eq!(messages[0].change_type, ChangeType::Modified);
        assert_eq!(messages[0].data, row(json!({"id": "o1", "total": 2})));
    }

    #[test]
    fn test_other_connection_table_yields_nothing() {
        let registry = registry();
        let engine = FanoutEngine::new(&registry, "docs");
        let event = RawChangeEvent {
            table: "orders".to_string(),
            change_type: ChangeType::Added,
            id: None,
            changes: None,
            old_data: None,
            new_data: Some(row(json!({"id": "o1", "user_id": "u1"}))),
        };
        assert!(engine.fanout(&event).is_empty());
    }

    #[test]
    fn test_delete_targets_old_ref() {
        let registry = registry();
        let engine = FanoutEngine::new(&registry, "default");
        let event = RawChangeEvent {
            table: "orders".to_string(),
            change_type: ChangeType::Removed,
            id: None,
            changes: None,
            old_data: Some(row(json!({"id": "o1", "user_id": "u1", "shop_id": "s1"}))),
            new_data: None,
        };

        let messages = engine.fanout_messages(&event);
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.change_type == ChangeType::Removed));
        assert_eq!(messages[0].reference, "users/u1/orders");
        assert_eq!(messages[0].data["id"], json!("o1"));
    }

    #[test]
    fn test_sync_message_wire_shape() {
        let message = SyncMessage {
            reference: "users/u1/orders".to_string(),
            change_type: ChangeType::Added,
            table: "orders".to_string(),
            data: row(json!({"id": "o1"})),
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"ref": "users/u1/orders", "type": "added", "table": "orders", "data": {"id": "o1"}})
        );
    }
}
