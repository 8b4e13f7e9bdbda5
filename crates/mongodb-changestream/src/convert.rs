//! Conversion between engine rows and BSON documents.
//!
//! Rows use `id`; documents use `_id`. An `id` that looks like an ObjectId
//! (24 hex digits) is stored as one, and ObjectIds come back as hex strings.

use anyhow::{anyhow, Result};
use bson::{oid::ObjectId, Bson, Document};
use livequery_core::{Row, IDENTITY_FIELD};
use serde_json::Value;

pub const NATIVE_ID_FIELD: &str = "_id";

/// Field name as stored in the document.
pub fn native_field(field: &str) -> &str {
    if field == IDENTITY_FIELD {
        NATIVE_ID_FIELD
    } else {
        field
    }
}

fn row_field(field: String) -> String {
    if field == NATIVE_ID_FIELD {
        IDENTITY_FIELD.to_string()
    } else {
        field
    }
}

pub fn json_to_bson(value: Value) -> Result<Bson> {
    Bson::try_from(value).map_err(|e| anyhow!("Invalid extended JSON: {e}"))
}

/// Convert an extended-JSON query or update document.
pub fn json_to_document(value: Value) -> Result<Document> {
    match json_to_bson(value)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(anyhow!("Expected a document, got {other}")),
    }
}

fn id_to_bson(value: Value) -> Result<Bson> {
    match value {
        Value::String(s) => match ObjectId::parse_str(&s) {
            Ok(oid) => Ok(Bson::ObjectId(oid)),
            Err(_) => Ok(Bson::String(s)),
        },
        other => json_to_bson(other),
    }
}

/// Row → document, renaming `id` to `_id`.
pub fn row_to_document(row: Row) -> Result<Document> {
    let mut doc = Document::new();
    for (field, value) in row {
        let value = if field == IDENTITY_FIELD {
            id_to_bson(value)?
        } else {
            json_to_bson(value)?
        };
        doc.insert(native_field(&field).to_string(), value);
    }
    Ok(doc)
}

pub fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::Document(doc) => Value::Object(document_to_row(doc)),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        other => other.into_relaxed_extjson(),
    }
}

/// Document → row, renaming `_id` to `id`.
pub fn document_to_row(doc: Document) -> Row {
    doc.into_iter()
        .map(|(field, value)| (row_field(field), bson_to_json(value)))
        .collect()
}
