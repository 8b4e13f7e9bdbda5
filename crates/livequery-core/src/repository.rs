//! Repository capability and request execution.
//!
//! [`Repository`] is the boundary to a concrete storage engine. [`execute`]
//! dispatches a resolved request onto it: `get` goes through the compiler,
//! writes bypass the filter pipeline and only use the path-bound keys.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::compiler::{compile, CompiledPredicate, CompilerSettings, SortKey};
use crate::error::{LivequeryError, Result};
use crate::request::{Method, QueryRequest};
use crate::route::RouteEntry;
use crate::Row;

/// Storage operations the engine relies on.
///
/// Each call is independent; no transactional guarantee beyond a single call
/// is assumed.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find(
        &self,
        predicate: &CompiledPredicate,
        sort: &[SortKey],
        limit: usize,
        select: Option<&[String]>,
    ) -> anyhow::Result<Vec<Row>>;

    async fn find_one(&self, predicate: &CompiledPredicate) -> anyhow::Result<Option<Row>>;

    async fn save(&self, row: Row) -> anyhow::Result<Row>;

    async fn update(&self, keys: &Row, patch: &Row) -> anyhow::Result<Value>;

    async fn delete(&self, keys: &Row) -> anyhow::Result<Value>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paging {
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// Result of [`execute`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResponse {
    Collection { items: Vec<Row>, paging: Paging },
    Document(Option<Row>),
    /// Storage result of a write, passed through unchanged
    Write(Value),
}

/// Execute a request against the repository backing `entry`.
pub async fn execute(
    request: &QueryRequest,
    entry: &RouteEntry,
    repository: &dyn Repository,
    settings: &CompilerSettings,
) -> Result<QueryResponse> {
    if entry.query_mapper_only && request.method.is_write() {
        return Err(LivequeryError::MethodNotMapped {
            method: request.method.to_string(),
            short_ref: entry.short_ref.clone(),
        });
    }

    match request.method {
        Method::Get => {
            let plan = compile(request, entry, settings)?;

            if !request.is_collection {
                let row = repository.find_one(&plan.predicate).await?;
                return Ok(QueryResponse::Document(row));
            }

            let rows = repository
                .find(
                    &plan.predicate,
                    &plan.sort,
                    plan.fetch_limit(),
                    plan.select.as_deref(),
                )
                .await?;
            let page = plan.paginate(rows);
            tracing::debug!(
                "Query on '{}' returned {} rows (has_more: {})",
                entry.short_ref,
                page.items.len(),
                page.has_more
            );
            Ok(QueryResponse::Collection {
                items: page.items,
                paging: Paging {
                    has_more: page.has_more,
                    next_cursor: page.next_cursor,
                },
            })
        }
        Method::Post => {
            // defaults < keys < body
            let mut row = entry.defaults.materialize();
            row.extend(request.keys.clone());
            row.extend(request.body.clone());
            let saved = repository.save(row).await?;
            Ok(QueryResponse::Write(Value::Object(saved)))
        }
        Method::Put | Method::Patch => {
            let result = repository.update(&request.keys, &request.body).await?;
            Ok(QueryResponse::Write(result))
        }
        Method::Delete => {
            let result = repository.delete(&request.keys).await?;
            Ok(QueryResponse::Write(result))
        }
    }
}
