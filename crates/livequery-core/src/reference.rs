//! Hierarchical references.
//!
//! A reference alternates static collection labels and key placeholders:
//!
//! ```text
//! users/:user_id/orders            collection (odd segment count)
//! users/:user_id/orders/:order_id  document   (even segment count)
//! ```
//!
//! The short-ref keeps only the labels (`users/orders`) and is the key the
//! route registry is looked up by.

use std::fmt;

use serde_json::Value;

use crate::error::{LivequeryError, Result};
use crate::Row;

/// One segment of a reference template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Static collection name
    Label(String),
    /// Placeholder bound to a row field
    Key(String),
}

/// Parsed reference template, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Template {
    segments: Vec<Segment>,
}

fn is_template_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/' | ':')
}

impl Template {
    /// Parse a template such as `users/:user_id/orders`.
    ///
    /// Segment roles are positional: even positions are labels, odd positions
    /// are keys. The `:` marker on keys is optional, so `users/user_id/orders`
    /// parses to the same template.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(c) = s.chars().find(|c| !is_template_char(*c)) {
            return Err(LivequeryError::invalid_reference(
                s,
                format!("character '{c}' is not allowed"),
            ));
        }

        let trimmed = s.trim_matches('/');
        if trimmed.is_empty() {
            return Err(LivequeryError::invalid_reference(s, "reference is empty"));
        }

        let mut segments = Vec::new();
        for (i, raw) in trimmed.split('/').enumerate() {
            if raw.is_empty() {
                return Err(LivequeryError::invalid_reference(
                    s,
                    format!("segment {i} is empty"),
                ));
            }
            if i % 2 == 0 {
                if raw.contains(':') {
                    return Err(LivequeryError::invalid_reference(
                        s,
                        format!("segment {i} ('{raw}') must be a collection label"),
                    ));
                }
                if let Some(Segment::Label(prev)) = segments.len().checked_sub(2).map(|p| &segments[p]) {
                    if prev == raw {
                        return Err(LivequeryError::invalid_reference(
                            s,
                            format!("label '{raw}' repeats its parent collection"),
                        ));
                    }
                }
                segments.push(Segment::Label(raw.to_string()));
            } else {
                let name = raw.strip_prefix(':').unwrap_or(raw);
                if name.is_empty() || name.contains(':') {
                    return Err(LivequeryError::invalid_reference(
                        s,
                        format!("segment {i} ('{raw}') is not a valid key name"),
                    ));
                }
                segments.push(Segment::Key(name.to_string()));
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_collection(&self) -> bool {
        self.segments.len() % 2 == 1
    }

    pub fn is_document(&self) -> bool {
        !self.is_collection()
    }

    /// Labels only, joined by `/`.
    pub fn short_ref(&self) -> String {
        self.labels().collect::<Vec<_>>().join("/")
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Label(l) => Some(l.as_str()),
            Segment::Key(_) => None,
        })
    }

    pub fn key_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Key(k) => Some(k.as_str()),
            Segment::Label(_) => None,
        })
    }

    /// The collection template addressing this template's rows.
    ///
    /// Document templates drop their trailing key; collection templates are
    /// returned unchanged.
    pub fn parent_collection(&self) -> Template {
        let mut segments = self.segments.clone();
        if self.is_document() {
            segments.pop();
        }
        Template { segments }
    }

    /// Build a concrete reference by substituting row fields into the keys.
    pub fn substitute(&self, row: &Row) -> Result<String> {
        let mut parts = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Label(label) => parts.push(label.clone()),
                Segment::Key(key) => {
                    let value = row
                        .get(key)
                        .and_then(segment_value)
                        .ok_or_else(|| LivequeryError::MissingField {
                            template: self.to_string(),
                            field: key.clone(),
                        })?;
                    parts.push(value);
                }
            }
        }
        Ok(parts.join("/"))
    }

    /// Bind the values of a concrete reference to this template's key names.
    ///
    /// Returns `None` when the concrete reference has a different shape.
    pub fn bind(&self, concrete: &ConcreteRef) -> Option<Row> {
        if concrete.segments.len() != self.segments.len() {
            return None;
        }
        let mut keys = Row::new();
        for (segment, value) in self.segments.iter().zip(&concrete.segments) {
            match segment {
                Segment::Label(label) if label != value => return None,
                Segment::Label(_) => {}
                Segment::Key(key) => {
                    keys.insert(key.clone(), Value::String(value.clone()));
                }
            }
        }
        Some(keys)
    }
}

/// Render a row value as a path segment. Only scalars can address a row.
fn segment_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            match segment {
                Segment::Label(l) => f.write_str(l)?,
                Segment::Key(k) => write!(f, ":{k}")?,
            }
        }
        Ok(())
    }
}

/// A concrete reference such as `users/u1/orders/o9`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcreteRef {
    segments: Vec<String>,
}

impl ConcreteRef {
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(LivequeryError::invalid_reference(path, "reference is empty"));
        }
        let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(LivequeryError::invalid_reference(path, "reference has an empty segment"));
        }
        Ok(Self { segments })
    }

    pub fn is_collection(&self) -> bool {
        self.segments.len() % 2 == 1
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn short_ref(&self) -> String {
        self.segments
            .iter()
            .step_by(2)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Combine every prefix with every path, dropping empty segments.
///
/// An empty prefix list leaves the paths as they are.
pub fn expand_paths(prefixes: &[String], paths: &[String]) -> Vec<String> {
    let prefixes: Vec<&str> = if prefixes.is_empty() {
        vec![""]
    } else {
        prefixes.iter().map(String::as_str).collect()
    };

    let mut out = Vec::new();
    for prefix in prefixes {
        for path in paths {
            let joined = format!("{prefix}/{path}");
            let normalized = joined
                .split('/')
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("/");
            if !out.contains(&normalized) {
                out.push(normalized);
            }
        }
    }
    out
}

/// Keep the part of a mounted path after the mount prefix.
pub fn strip_mount_prefix<'a>(path: &'a str, mount_prefix: &str) -> &'a str {
    if mount_prefix.is_empty() {
        return path;
    }
    match path.split_once(mount_prefix) {
        Some((_, rest)) => rest,
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_collection_and_document() {
        let collection = Template::parse("users/:user_id/orders").unwrap();
        assert!(collection.is_collection());
        assert_eq!(collection.segments().len(), 3);

        let document = Template::parse("users/:user_id/orders/:order_id").unwrap();
        assert!(document.is_document());
        assert_eq!(document.key_names().collect::<Vec<_>>(), vec!["user_id", "order_id"]);
    }

    #[test]
    fn test_colon_marker_is_optional() {
        let a = Template::parse("users/:user_id/orders").unwrap();
        let b = Template::parse("users/user_id/orders").unwrap();
        assert_eq!(a, b);
        assert_eq!(b.to_string(), "users/:user_id/orders");
    }

    #[test]
    fn test_rejects_invalid_characters() {
        let err = Template::parse("users/:id?x=1").unwrap_err();
        assert_eq!(err.code(), "INVALID_REFERENCE");
    }

    #[test]
    fn test_rejects_empty_segments_and_misplaced_keys() {
        assert!(Template::parse("").is_err());
        assert!(Template::parse("users//orders").is_err());
        assert!(Template::parse(":user_id/orders").is_err());
        assert!(Template::parse("users/:").is_err());
        assert!(Template::parse("users/:id/users").is_err());
    }

    #[test]
    fn test_short_ref_strips_keys_in_order() {
        for (template, expected) in [
            ("users", "users"),
            ("users/:user_id", "users"),
            ("users/:user_id/orders", "users/orders"),
            ("users/:user_id/orders/:order_id", "users/orders"),
            ("a/:x/b/:y/c", "a/b/c"),
        ] {
            assert_eq!(Template::parse(template).unwrap().short_ref(), expected);
        }
    }

    #[test]
    fn test_substitute_document_template() {
        let template = Template::parse("users/:user_id/orders/:order_id").unwrap();
        let data = row(json!({"user_id": "u1", "order_id": "o9", "total": 42}));
        assert_eq!(template.substitute(&data).unwrap(), "users/u1/orders/o9");

        let parent = template.parent_collection();
        assert_eq!(parent.short_ref(), "users/orders");
        assert_eq!(
            parent.substitute(&row(json!({"user_id": "u1"}))).unwrap(),
            "users/u1/orders"
        );
    }

    #[test]
    fn test_substitute_numeric_key() {
        let template = Template::parse("shops/:shop_id/items").unwrap();
        let data = row(json!({"shop_id": 7}));
        assert_eq!(template.substitute(&data).unwrap(), "shops/7/items");
    }

    #[test]
    fn test_substitute_missing_field_fails() {
        let template = Template::parse("users/:user_id/orders").unwrap();
        let err = template.substitute(&row(json!({"id": 1}))).unwrap_err();
        assert_eq!(err.code(), "MISSING_FIELD");

        let err = template.substitute(&row(json!({"user_id": null}))).unwrap_err();
        assert_eq!(err.code(), "MISSING_FIELD");
    }

    #[test]
    fn test_bind_concrete_reference() {
        let template = Template::parse("users/:user_id/orders/:order_id").unwrap();
        let concrete = ConcreteRef::parse("users/u1/orders/o9").unwrap();
        let keys = template.bind(&concrete).unwrap();
        assert_eq!(keys, row(json!({"user_id": "u1", "order_id": "o9"})));

        let other = ConcreteRef::parse("users/u1/orders").unwrap();
        assert!(template.bind(&other).is_none());
        assert_eq!(other.short_ref(), "users/orders");
        assert!(other.is_collection());
    }

    #[test]
    fn test_expand_paths() {
        let prefixes = vec!["/livequery/".to_string(), "api".to_string()];
        let paths = vec!["users/:id/".to_string()];
        assert_eq!(
            expand_paths(&prefixes, &paths),
            vec!["livequery/users/:id".to_string(), "api/users/:id".to_string()]
        );
        assert_eq!(expand_paths(&[], &paths), vec!["users/:id".to_string()]);
    }

    #[test]
    fn test_strip_mount_prefix() {
        assert_eq!(
            strip_mount_prefix("api/livequery/users/:id", "livequery/"),
            "users/:id"
        );
        assert_eq!(strip_mount_prefix("users/:id", "livequery/"), "users/:id");
        assert_eq!(strip_mount_prefix("users/:id", ""), "users/:id");
    }
}
