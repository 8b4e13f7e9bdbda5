//! MongoDB client utilities

use std::time::Duration;

use anyhow::{Context, Result};
use mongodb::{options::ClientOptions, Client as MongoClient, Database};

/// Connect and select `database`, falling back to the URI's default database.
pub async fn new_mongodb_database(uri: &str, database: Option<&str>) -> Result<Database> {
    let mut options = ClientOptions::parse(uri)
        .await
        .context("Failed to parse MongoDB connection options")?;
    options.connect_timeout = Some(Duration::from_secs(10));
    options.server_selection_timeout = Some(Duration::from_secs(10));

    let client = MongoClient::with_options(options)?;
    match database {
        Some(name) => Ok(client.database(name)),
        None => client
            .default_database()
            .context("MongoDB database name is required"),
    }
}
