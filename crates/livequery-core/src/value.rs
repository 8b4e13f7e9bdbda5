//! Helpers for loosely-typed row values.

use std::cmp::Ordering;

use serde_json::Value;

use crate::Row;

/// Order two JSON scalars of the same kind. Mixed kinds are unordered.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        _ => None,
    }
}

/// Equality that also accepts a path-bound string against a number or bool.
pub fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::String(s), Value::Number(_) | Value::Bool(_))
        | (Value::Number(_) | Value::Bool(_), Value::String(s)) => {
            let other = if matches!(a, Value::String(_)) { b } else { a };
            *s == other.to_string()
        }
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        _ => false,
    }
}

/// Parse string values that hold a JSON object.
///
/// Change notifications carry nested `json`/`jsonb` columns as text; this
/// restores them to objects. Strings that fail to parse are kept as-is.
pub fn unwrap_json_strings(row: Row) -> Row {
    row.into_iter()
        .map(|(field, value)| match value {
            Value::String(s) if s.starts_with("{\"") && s.ends_with('}') => {
                match serde_json::from_str::<Value>(&s) {
                    Ok(parsed @ Value::Object(_)) => (field, parsed),
                    _ => (field, Value::String(s)),
                }
            }
            other => (field, other),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compare() {
        assert_eq!(compare(&json!(1), &json!(2.5)), Some(Ordering::Less));
        assert_eq!(compare(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert_eq!(compare(&json!(1), &json!("1")), None);
    }

    #[test]
    fn test_loosely_equal() {
        assert!(loosely_equal(&json!("7"), &json!(7)));
        assert!(loosely_equal(&json!(true), &json!("true")));
        assert!(loosely_equal(&json!(1.0), &json!(1)));
        assert!(!loosely_equal(&json!("7"), &json!(8)));
    }

    #[test]
    fn test_unwrap_json_strings() {
        let row = json!({"meta": "{\"a\":1}", "broken": "{\"a\":}", "name": "x"});
        let row = unwrap_json_strings(row.as_object().cloned().unwrap());
        assert_eq!(row["meta"], json!({"a": 1}));
        assert_eq!(row["broken"], json!("{\"a\":}"));
        assert_eq!(row["name"], json!("x"));
    }
}
