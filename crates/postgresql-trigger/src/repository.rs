//! Relational repository over `tokio-postgres`.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use livequery_core::compiler::RelationalPredicate;
use livequery_core::{CompiledPredicate, Repository, Row, SortKey};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

use crate::sql::{self, Statement};

pub struct PostgresRepository {
    client: Arc<Mutex<Client>>,
    table: String,
}

fn relational(predicate: &CompiledPredicate) -> Result<&RelationalPredicate> {
    match predicate {
        CompiledPredicate::Relational(p) => Ok(p),
        CompiledPredicate::Document(_) => bail!("PostgreSQL repository received a document predicate"),
    }
}

fn into_row(value: Value) -> Result<Row> {
    match value {
        Value::Object(row) => Ok(row),
        other => bail!("Expected a JSON object row, got {other}"),
    }
}

impl PostgresRepository {
    pub fn new(client: Arc<Mutex<Client>>, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn query_rows(&self, statement: Statement) -> Result<Vec<Row>> {
        log::debug!("{} {:?}", statement.sql, statement.params);
        let params: Vec<&(dyn ToSql + Sync)> = statement
            .params
            .iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect();

        let client = self.client.lock().await;
        let rows = client
            .query(&statement.sql, &params)
            .await
            .with_context(|| format!("Query on '{}' failed", self.table))?;

        rows.iter()
            .map(|row| into_row(row.try_get::<_, Value>(0)?))
            .collect()
    }

    async fn execute(&self, statement: Statement) -> Result<u64> {
        log::debug!("{} {:?}", statement.sql, statement.params);
        let params: Vec<&(dyn ToSql + Sync)> = statement
            .params
            .iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect();

        let client = self.client.lock().await;
        client
            .execute(&statement.sql, &params)
            .await
            .with_context(|| format!("Write on '{}' failed", self.table))
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn find(
        &self,
        predicate: &CompiledPredicate,
        sort: &[SortKey],
        limit: usize,
        select: Option<&[String]>,
    ) -> Result<Vec<Row>> {
        let statement = sql::select(&self.table, relational(predicate)?, sort, Some(limit), select);
        self.query_rows(statement).await
    }

    async fn find_one(&self, predicate: &CompiledPredicate) -> Result<Option<Row>> {
        let statement = sql::select(&self.table, relational(predicate)?, &[], Some(1), None);
        Ok(self.query_rows(statement).await?.into_iter().next())
    }

    async fn save(&self, row: Row) -> Result<Row> {
        self.query_rows(sql::insert(&self.table, &row))
            .await?
            .into_iter()
            .next()
            .with_context(|| format!("Insert into '{}' returned no row", self.table))
    }

    async fn update(&self, keys: &Row, patch: &Row) -> Result<Value> {
        if keys.is_empty() {
            bail!("Refusing to update '{}' without keys", self.table);
        }
        let affected = match sql::update(&self.table, keys, patch) {
            Some(statement) => self.execute(statement).await?,
            None => 0,
        };
        Ok(json!({ "affected": affected }))
    }

    async fn delete(&self, keys: &Row) -> Result<Value> {
        if keys.is_empty() {
            bail!("Refusing to delete from '{}' without keys", self.table);
        }
        let affected = self.execute(sql::delete(&self.table, keys)).await?;
        Ok(json!({ "affected": affected }))
    }
}
