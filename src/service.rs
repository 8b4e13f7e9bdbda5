//! Request dispatch behind the registry initialization barrier.
//!
//! A [`LiveQuery`] handle can be cloned and used before the registry exists;
//! every request waits until [`Initializer::complete`] has run. After that
//! the registry is read-only and requests proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use livequery_core::{
    execute, CompilerSettings, DbFamily, Filter, LivequeryError, Method, QueryOptions,
    QueryRequest, QueryResponse, Repository, RouteRegistry, Row,
};
use livequery_mongodb_changestream::{new_mongodb_database, MongoRepository};
use livequery_postgresql_trigger::{new_postgresql_client, PostgresRepository};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::LivequeryConfig;

/// Repositories keyed by `(connection, entity)`.
pub type RepositoryMap = HashMap<(String, String), Arc<dyn Repository>>;

/// Everything a request needs once initialization is done.
pub struct Ready {
    pub registry: Arc<RouteRegistry>,
    repositories: RepositoryMap,
    settings: CompilerSettings,
}

/// Filters, options and body of one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub options: QueryOptions,
    #[serde(default)]
    pub body: Row,
}

#[derive(Clone)]
pub struct LiveQuery {
    state: watch::Receiver<Option<Arc<Ready>>>,
}

/// Completes the barrier of the [`LiveQuery`] it was created with.
pub struct Initializer {
    sender: watch::Sender<Option<Arc<Ready>>>,
}

impl Initializer {
    pub fn complete(
        self,
        registry: Arc<RouteRegistry>,
        repositories: RepositoryMap,
        settings: CompilerSettings,
    ) {
        tracing::info!(
            "Route registry ready: {} routes, {} repositories",
            registry.entries().len(),
            repositories.len()
        );
        let ready = Arc::new(Ready {
            registry,
            repositories,
            settings,
        });
        self.sender.send_replace(Some(ready));
    }
}

impl LiveQuery {
    /// A handle whose requests wait for the returned initializer.
    pub fn pending() -> (Self, Initializer) {
        let (sender, state) = watch::channel(None);
        (Self { state }, Initializer { sender })
    }

    pub fn from_parts(
        registry: Arc<RouteRegistry>,
        repositories: RepositoryMap,
        settings: CompilerSettings,
    ) -> Self {
        let (service, init) = Self::pending();
        init.complete(registry, repositories, settings);
        service
    }

    /// Connect every configured connection and build one repository per
    /// routed entity.
    pub async fn connect(config: &LivequeryConfig) -> Result<Self> {
        let registry = Arc::new(config.registry()?);
        let mut repositories: RepositoryMap = HashMap::new();

        for connection in &config.connections {
            let mut entities: Vec<&str> = Vec::new();
            for entry in registry.entries().iter().filter(|e| e.connection == connection.name) {
                if !entities.contains(&entry.entity.as_str()) {
                    entities.push(&entry.entity);
                }
            }
            if entities.is_empty() {
                continue;
            }

            match connection.family {
                DbFamily::Relational => {
                    let client = new_postgresql_client(&connection.uri)
                        .await
                        .with_context(|| format!("Connection '{}'", connection.name))?;
                    for entity in entities {
                        let repository = PostgresRepository::new(client.clone(), entity);
                        repositories.insert(
                            (connection.name.clone(), entity.to_string()),
                            Arc::new(repository),
                        );
                    }
                }
                DbFamily::Document => {
                    let database =
                        new_mongodb_database(&connection.uri, connection.database.as_deref())
                            .await
                            .with_context(|| format!("Connection '{}'", connection.name))?;
                    for entity in entities {
                        let repository = MongoRepository::new(&database, entity);
                        repositories.insert(
                            (connection.name.clone(), entity.to_string()),
                            Arc::new(repository),
                        );
                    }
                }
            }
        }

        Ok(Self::from_parts(registry, repositories, config.settings()))
    }

    /// Wait for the initialization barrier.
    pub async fn ready(&self) -> Arc<Ready> {
        let mut state = self.state.clone();
        loop {
            let current = state.borrow_and_update().clone();
            if let Some(ready) = current {
                return ready;
            }
            if state.changed().await.is_err() {
                // Initializer dropped without completing
                std::future::pending::<()>().await;
            }
        }
    }

    pub async fn registry(&self) -> Arc<RouteRegistry> {
        self.ready().await.registry.clone()
    }

    /// Resolve `path`, compile and execute one request.
    pub async fn query(
        &self,
        method: Method,
        path: &str,
        params: QueryParams,
    ) -> livequery_core::Result<QueryResponse> {
        let ready = self.ready().await;
        let resolved = ready.registry.match_ref(path)?;
        let entry = resolved.entry;

        let repository = ready
            .repositories
            .get(&(entry.connection.clone(), entry.entity.clone()))
            .ok_or_else(|| LivequeryError::ConnectionNotFound(entry.connection.clone()))?;

        let request = QueryRequest {
            method,
            short_ref: entry.short_ref.clone(),
            is_collection: resolved.is_collection,
            keys: resolved.keys,
            filters: params.filters,
            options: params.options,
            body: params.body,
        };
        tracing::debug!("{method} {path} -> {}@{}", entry.entity, entry.connection);

        execute(&request, entry, repository.as_ref(), &ready.settings).await
    }
}
