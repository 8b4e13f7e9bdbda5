//! Document-store rendering: MongoDB query documents in extended JSON.

use serde_json::{json, Map, Value};

use super::{Condition, Conjunction, LogicalPredicate};
use crate::IDENTITY_FIELD;

/// Field name of the native primary key.
pub const NATIVE_ID_FIELD: &str = "_id";

fn operator_entries(condition: &Condition) -> Vec<(&'static str, Value)> {
    match condition {
        Condition::Eq(v) => vec![("$eq", v.clone())],
        Condition::Ne(v) => vec![("$ne", v.clone())],
        Condition::Lt(v) => vec![("$lt", v.clone())],
        Condition::Lte(v) => vec![("$lte", v.clone())],
        Condition::Gt(v) => vec![("$gt", v.clone())],
        Condition::Gte(v) => vec![("$gte", v.clone())],
        Condition::Between(low, high) => vec![("$gte", low.clone()), ("$lt", high.clone())],
        Condition::In(values) => vec![("$in", Value::Array(values.clone()))],
        Condition::Like(term) => vec![
            ("$regex", Value::String(regex::escape(term))),
            ("$options", Value::String("i".to_string())),
        ],
    }
}

fn is_object_id(s: &str) -> bool {
    s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// ObjectId-shaped strings become `{"$oid": ...}`; everything else is kept.
fn native_id_value(value: Value) -> Value {
    match value {
        Value::String(s) if is_object_id(&s) => json!({ "$oid": s }),
        Value::Array(values) => Value::Array(values.into_iter().map(native_id_value).collect()),
        other => other,
    }
}

/// Re-express the identity sub-document against `_id`.
fn native_id_match(sub: Map<String, Value>) -> Value {
    if sub.len() == 1 {
        if let Some(value) = sub.get("$eq") {
            return native_id_value(value.clone());
        }
    }
    Value::Object(
        sub.into_iter()
            .map(|(op, value)| (op, native_id_value(value)))
            .collect(),
    )
}

fn render_conjunction(conjunction: &Conjunction) -> Map<String, Value> {
    let mut doc = Map::new();
    for (field, conditions) in conjunction {
        // Later operators win when two conditions share one
        let mut sub = Map::new();
        for condition in conditions {
            for (op, value) in operator_entries(condition) {
                sub.insert(op.to_string(), value);
            }
        }
        if field == IDENTITY_FIELD {
            doc.insert(NATIVE_ID_FIELD.to_string(), native_id_match(sub));
        } else {
            doc.insert(field.clone(), Value::Object(sub));
        }
    }
    doc
}

pub(super) fn render(logical: &LogicalPredicate) -> Value {
    let mut doc = render_conjunction(&logical.base);

    let groups: Vec<Value> = logical
        .groups
        .iter()
        .filter(|g| !g.is_empty())
        .map(|group| {
            Value::Array(
                group
                    .iter()
                    .map(|c| Value::Object(render_conjunction(c)))
                    .collect(),
            )
        })
        .collect();

    match groups.len() {
        0 => {}
        1 => {
            if let Some(alternatives) = groups.into_iter().next() {
                doc.insert("$or".to_string(), alternatives);
            }
        }
        _ => {
            let clauses = groups
                .into_iter()
                .map(|alternatives| json!({ "$or": alternatives }))
                .collect();
            doc.insert("$and".to_string(), Value::Array(clauses));
        }
    }

    if let Some(term) = &logical.text_search {
        doc.insert("$text".to_string(), json!({ "$search": term }));
    }

    Value::Object(doc)
}
