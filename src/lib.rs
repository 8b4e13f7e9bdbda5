//! livequery-sync
//!
//! Serves hierarchical references (`users/u1/orders`) over PostgreSQL tables
//! and MongoDB collections, and turns row changes into per-reference sync
//! messages.
//!
//! # Crates
//!
//! - `livequery_core` - routing, query compilation, cursors and change fanout
//! - `livequery_postgresql_trigger` - trigger SQL, `LISTEN` feed and relational repository
//! - `livequery_mongodb_changestream` - change streams and document repository
//!
//! This crate wires them together:
//!
//! - [`config`] - connections and routes from a YAML or TOML file
//! - [`service`] - request dispatch behind the initialization barrier
//! - [`hub`] - one change feed per connection, broadcast to subscribers
//!
//! # CLI Usage
//!
//! ```bash
//! # Show the route table
//! livequery-sync --config livequery.yaml routes
//!
//! # Print the trigger SQL for realtime tables
//! livequery-sync --config livequery.yaml trigger-sql
//!
//! # Stream sync messages as JSON lines
//! livequery-sync --config livequery.yaml listen
//!
//! # Run one request
//! livequery-sync --config livequery.yaml query users/u1/orders \
//!   --filter status:eq:open --limit 10
//! ```

pub mod config;
pub mod hub;
pub mod service;

pub use config::{ConnectionConfig, LivequeryConfig};
pub use hub::ChangeHub;
pub use service::{Initializer, LiveQuery, QueryParams, RepositoryMap};
