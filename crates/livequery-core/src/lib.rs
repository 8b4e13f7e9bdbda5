//! Core of livequery-sync.
//!
//! Clients address data through hierarchical references
//! (`collection/key/collection/...`) instead of table names. This crate
//! provides:
//!
//! - [`reference`] - reference templates, short-refs and substitution
//! - [`route`] - the registry binding templates to backing entities
//! - [`compiler`] - request → backend predicate, ordering and pagination
//! - [`cursor`] - opaque pagination tokens
//! - [`fanout`] - row changes → reference-scoped sync messages
//! - [`repository`] - the storage boundary and request execution
//!
//! # Architecture
//!
//! ```text
//! livequery-core (this crate)
//!    │
//!    ├─── livequery-postgresql-trigger   (trigger SQL, LISTEN feed, relational repository)
//!    └─── livequery-mongodb-changestream (change streams, document repository)
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use livequery_core::route::{DbFamily, RouteConfig, RouteRegistry};
//!
//! let connections = HashMap::from([("default".to_string(), DbFamily::Relational)]);
//! let routes = vec![RouteConfig::new(&["users/:user_id/orders/:id"], "orders").realtime()];
//! let registry = RouteRegistry::register(&routes, &connections, "").unwrap();
//!
//! let resolved = registry.match_ref("users/u1/orders/o9").unwrap();
//! assert_eq!(resolved.entry.entity, "orders");
//! assert!(!resolved.is_collection);
//! ```

pub mod compiler;
pub mod cursor;
pub mod error;
pub mod fanout;
pub mod memory;
pub mod reference;
pub mod repository;
pub mod request;
pub mod route;
pub mod value;

/// A row as seen by the engine: field name → JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Field holding a row's identifier.
pub const IDENTITY_FIELD: &str = "id";

pub use compiler::{compile, CompiledPredicate, CompilerSettings, Condition, QueryPlan, SortKey};
pub use error::{ErrorBody, ErrorKind, LivequeryError, Result};
pub use fanout::{
    split_moves, ChangeType, FanoutEngine, RawChangeEvent, SyncMessage, SyncPayload,
};
pub use memory::MemoryRepository;
pub use reference::{ConcreteRef, Template};
pub use repository::{execute, Paging, QueryResponse, Repository};
pub use request::{Filter, Method, Operator, QueryOptions, QueryRequest, SortDir};
pub use route::{DbFamily, ResolvedRef, RouteConfig, RouteEntry, RouteRegistry};
