//! MongoDB backend for livequery-sync
//!
//! Queries compiled to the document rendering run through
//! [`MongoRepository`]; database-level change streams feed the fanout engine
//! through [`ChangeStreamListener`].

pub mod change_stream;
mod client;
pub mod convert;
mod repository;

pub use change_stream::{convert_change, ChangeParts, ChangeStreamListener};
pub use client::new_mongodb_database;
pub use repository::MongoRepository;
