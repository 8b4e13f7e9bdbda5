//! PostgreSQL backend for livequery-sync
//!
//! Change capture uses a per-table trigger that publishes row changes with
//! `pg_notify`, consumed by a single `LISTEN` connection per logical
//! connection. Works with PostgreSQL 11+ (`EXECUTE FUNCTION` triggers).

mod client;
pub mod listener;
pub mod notification;
mod repository;
pub mod sql;
pub mod trigger;

pub use client::{new_notification_client, new_postgresql_client};
pub use listener::TriggerListener;
pub use notification::ChangeNotification;
pub use repository::PostgresRepository;
pub use trigger::{create_notify_function_sql, create_table_trigger_sql, install_statements, NOTIFY_CHANNEL};
