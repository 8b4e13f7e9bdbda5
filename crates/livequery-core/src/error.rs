//! Error types surfaced by the livequery engine.
//!
//! Every variant carries a stable machine code (see [`LivequeryError::code`])
//! that callers forward to clients unchanged, e.g. `REF_NOT_FOUND` or
//! `QUERY_XOR_NOT_SUPPORT`.

use serde::Serialize;

use crate::route::DbFamily;

pub type Result<T, E = LivequeryError> = std::result::Result<T, E>;

/// Error type for routing, query compilation and fanout.
#[derive(Debug, thiserror::Error)]
pub enum LivequeryError {
    /// No route is registered for the requested short-ref
    #[error("Missing ref config in livequery system: '{0}'")]
    RefNotFound(String),

    /// The same short-ref is bound to two different entities
    #[error("Route '{short_ref}' is already bound to '{existing}', cannot bind it to '{entity}'")]
    DuplicateRoute {
        short_ref: String,
        existing: String,
        entity: String,
    },

    /// Two configs share a short-ref and entity but disagree on a setting
    #[error("Route '{short_ref}' is configured twice with a different '{setting}'")]
    ConflictingRoute { short_ref: String, setting: String },

    /// Reference string or template failed validation
    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// A route refers to a connection nobody configured
    #[error("Database connection '{0}' not found")]
    ConnectionNotFound(String),

    /// Pagination cursor could not be decoded
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Filter operator is not part of the supported operator set
    #[error("Query operator '{0}' is not supported")]
    OperatorNotSupported(String),

    /// Filter value does not fit its operator
    #[error("Invalid filter on '{field}': {reason}")]
    InvalidFilter { field: String, reason: String },

    /// Free-text search requested where the backend cannot express it
    #[error("{0} backend cannot run a search without search fields")]
    SearchNotSupported(DbFamily),

    /// Requested page size is out of range
    #[error("Limit must be between 1 and {max}, got {limit}")]
    InvalidLimit { limit: usize, max: usize },

    /// Writes on query-mapper-only routes are handled outside the engine
    #[error("Method '{method}' is not mapped for route '{short_ref}'")]
    MethodNotMapped { method: String, short_ref: String },

    /// A key field needed to build a reference is absent from the row
    #[error("Field '{field}' is missing from row for reference '{template}'")]
    MissingField { template: String, field: String },

    /// Failure reported by the backing repository
    #[error(transparent)]
    Repository(#[from] anyhow::Error),
}

/// Coarse classification used to decide how an error is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal at startup, never recovered
    Configuration,
    /// The request addressed something that does not exist
    Resolution,
    /// The request itself is malformed; the caller must correct it
    RequestShape,
    /// The storage engine failed
    Storage,
}

impl LivequeryError {
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> String {
        match self {
            Self::RefNotFound(_) => "REF_NOT_FOUND".to_string(),
            Self::DuplicateRoute { .. } | Self::ConflictingRoute { .. } => {
                "DUPLICATE_ROUTE".to_string()
            }
            Self::InvalidReference { .. } => "INVALID_REFERENCE".to_string(),
            Self::ConnectionNotFound(_) => "CONNECTION_NOT_FOUND".to_string(),
            Self::InvalidCursor(_) => "INVALID_CURSOR".to_string(),
            Self::OperatorNotSupported(op) => format!("QUERY_{}_NOT_SUPPORT", op.to_uppercase()),
            Self::SearchNotSupported(family) => format!("{}_SEARCH_NOT_SUPPORT", family.code()),
            Self::InvalidFilter { .. } => "INVALID_FILTER".to_string(),
            Self::InvalidLimit { .. } => "INVALID_LIMIT".to_string(),
            Self::MethodNotMapped { .. } => "METHOD_NOT_MAPPED".to_string(),
            Self::MissingField { .. } => "MISSING_FIELD".to_string(),
            Self::Repository(_) => "REPOSITORY_ERROR".to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateRoute { .. }
            | Self::ConflictingRoute { .. }
            | Self::InvalidReference { .. }
            | Self::ConnectionNotFound(_) => ErrorKind::Configuration,
            Self::RefNotFound(_) => ErrorKind::Resolution,
            Self::InvalidCursor(_)
            | Self::OperatorNotSupported(_)
            | Self::InvalidFilter { .. }
            | Self::SearchNotSupported(_)
            | Self::InvalidLimit { .. }
            | Self::MethodNotMapped { .. }
            | Self::MissingField { .. } => ErrorKind::RequestShape,
            Self::Repository(_) => ErrorKind::Storage,
        }
    }

    /// HTTP-style status for transports that want one.
    pub fn status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Resolution => 404,
            ErrorKind::RequestShape => 400,
            ErrorKind::Configuration | ErrorKind::Storage => 500,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            status: self.status(),
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Structured error handed back to callers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub status: u16,
    pub code: String,
    pub message: String,
}
