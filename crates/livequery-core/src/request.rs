//! Backend-agnostic query requests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LivequeryError;
use crate::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn is_write(&self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "get",
            Method::Post => "post",
            Method::Put => "put",
            Method::Patch => "patch",
            Method::Delete => "delete",
        };
        f.write_str(s)
    }
}

impl FromStr for Method {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Method::Get),
            "post" => Ok(Method::Post),
            "put" => Ok(Method::Put),
            "patch" => Ok(Method::Patch),
            "delete" => Ok(Method::Delete),
            other => Err(anyhow::anyhow!("Unknown method: {other}")),
        }
    }
}

/// Filter operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Between,
    In,
    Like,
}

impl FromStr for Operator {
    type Err = LivequeryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(Operator::Eq),
            "ne" => Ok(Operator::Ne),
            "lt" => Ok(Operator::Lt),
            "lte" => Ok(Operator::Lte),
            "gt" => Ok(Operator::Gt),
            "gte" => Ok(Operator::Gte),
            "between" => Ok(Operator::Between),
            "in" => Ok(Operator::In),
            "like" => Ok(Operator::Like),
            other => Err(LivequeryError::OperatorNotSupported(other.to_string())),
        }
    }
}

/// A client filter `(field, operator, value)`.
///
/// The operator stays a raw string until compilation so that an unknown
/// operator is reported with its original spelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: String,
    pub value: Value,
}

impl Filter {
    pub fn new(field: &str, op: &str, value: Value) -> Self {
        Self {
            field: field.to_string(),
            op: op.to_string(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortDir {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDir::Asc),
            "desc" => Ok(SortDir::Desc),
            other => Err(anyhow::anyhow!("Unknown sort direction: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Page size; the compiler falls back to its default when absent
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default, alias = "sort_field")]
    pub order_by: Option<String>,
    #[serde(default, alias = "sort_dir")]
    pub sort: SortDir,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub select: Option<Vec<String>>,
    #[serde(default)]
    pub search: Option<String>,
}

/// A request against one resolved reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub method: Method,
    pub short_ref: String,
    pub is_collection: bool,
    /// Identity fields bound from the reference path; never overridable
    #[serde(default)]
    pub keys: Row,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub options: QueryOptions,
    /// Payload of write methods
    #[serde(default)]
    pub body: Row,
}

impl QueryRequest {
    pub fn get(short_ref: &str, is_collection: bool) -> Self {
        Self {
            method: Method::Get,
            short_ref: short_ref.to_string(),
            is_collection,
            keys: Row::new(),
            filters: Vec::new(),
            options: QueryOptions::default(),
            body: Row::new(),
        }
    }

    pub fn with_filter(mut self, field: &str, op: &str, value: Value) -> Self {
        self.filters.push(Filter::new(field, op, value));
        self
    }

    pub fn with_key(mut self, field: &str, value: Value) -> Self {
        self.keys.insert(field.to_string(), value);
        self
    }
}
