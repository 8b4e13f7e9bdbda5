//! Opaque pagination cursors.
//!
//! A cursor is the JSON object of last-seen sort values, base64 encoded with
//! the URL-safe alphabet so it can travel in query strings untouched.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use crate::error::{LivequeryError, Result};
use crate::Row;

pub fn encode(values: &Row) -> String {
    // A map of JSON values always serializes
    let json = serde_json::Value::Object(values.clone()).to_string();
    URL_SAFE_NO_PAD.encode(json.as_bytes())
}

/// Decode a cursor; an absent or empty cursor yields an empty mapping.
pub fn decode(token: Option<&str>) -> Result<Row> {
    let token = match token {
        Some(t) if !t.is_empty() => t,
        _ => return Ok(Row::new()),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|e| LivequeryError::InvalidCursor(e.to_string()))?;

    match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(serde_json::Value::Object(values)) => Ok(values),
        Ok(other) => Err(LivequeryError::InvalidCursor(format!(
            "expected an object, got {other}"
        ))),
        Err(e) => Err(LivequeryError::InvalidCursor(e.to_string())),
    }
}
