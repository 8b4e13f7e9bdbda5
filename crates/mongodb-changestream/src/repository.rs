//! Document repository over the MongoDB driver.

use anyhow::{bail, Result};
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use livequery_core::{CompiledPredicate, Repository, Row, SortDir, SortKey, IDENTITY_FIELD};
use mongodb::{Collection, Database};
use serde_json::{json, Value};

use crate::convert::{bson_to_json, document_to_row, json_to_document, native_field, row_to_document};

pub struct MongoRepository {
    collection: Collection<Document>,
}

fn filter(predicate: &CompiledPredicate) -> Result<Document> {
    match predicate {
        CompiledPredicate::Document(query) => json_to_document(query.clone()),
        CompiledPredicate::Relational(_) => {
            bail!("MongoDB repository received a relational predicate")
        }
    }
}

pub(crate) fn sort_document(sort: &[SortKey]) -> Document {
    sort.iter()
        .map(|key| {
            let dir = match key.dir {
                SortDir::Asc => 1_i32,
                SortDir::Desc => -1_i32,
            };
            (native_field(&key.field).to_string(), Bson::Int32(dir))
        })
        .collect()
}

pub(crate) fn projection_document(fields: &[String]) -> Document {
    let mut projection: Document = fields
        .iter()
        .map(|f| (native_field(f).to_string(), Bson::Int32(1)))
        .collect();
    // `_id` is returned unless excluded explicitly
    if !fields.iter().any(|f| f == IDENTITY_FIELD) {
        projection.insert("_id", 0_i32);
    }
    projection
}

impl MongoRepository {
    pub fn new(database: &Database, collection: &str) -> Self {
        Self {
            collection: database.collection::<Document>(collection),
        }
    }

    pub fn name(&self) -> &str {
        self.collection.name()
    }
}

#[async_trait]
impl Repository for MongoRepository {
    async fn find(
        &self,
        predicate: &CompiledPredicate,
        sort: &[SortKey],
        limit: usize,
        select: Option<&[String]>,
    ) -> Result<Vec<Row>> {
        let filter = filter(predicate)?;
        tracing::debug!("find on {}: {filter}", self.name());

        let mut find = self
            .collection
            .find(filter)
            .sort(sort_document(sort))
            .limit(i64::try_from(limit)?);
        if let Some(fields) = select {
            find = find.projection(projection_document(fields));
        }

        let docs: Vec<Document> = find.await?.try_collect().await?;
        Ok(docs.into_iter().map(document_to_row).collect())
    }

    async fn find_one(&self, predicate: &CompiledPredicate) -> Result<Option<Row>> {
        let filter = filter(predicate)?;
        Ok(self.collection.find_one(filter).await?.map(document_to_row))
    }

    async fn save(&self, row: Row) -> Result<Row> {
        let doc = row_to_document(row)?;
        let result = self.collection.insert_one(doc.clone()).await?;

        let mut saved = document_to_row(doc);
        saved.insert(IDENTITY_FIELD.to_string(), bson_to_json(result.inserted_id));
        Ok(saved)
    }

    async fn update(&self, keys: &Row, patch: &Row) -> Result<Value> {
        if keys.is_empty() {
            bail!("Refusing to update '{}' without keys", self.name());
        }
        if patch.is_empty() {
            return Ok(json!({ "matched": 0, "modified": 0 }));
        }
        let filter = row_to_document(keys.clone())?;
        let changes = row_to_document(patch.clone())?;
        let update = doc! { "$set": changes };
        let result = self.collection.update_many(filter, update).await?;
        Ok(json!({
            "matched": result.matched_count,
            "modified": result.modified_count,
        }))
    }

    async fn delete(&self, keys: &Row) -> Result<Value> {
        if keys.is_empty() {
            bail!("Refusing to delete from '{}' without keys", self.name());
        }
        let filter = row_to_document(keys.clone())?;
        let result = self.collection.delete_many(filter).await?;
        Ok(json!({ "deleted": result.deleted_count }))
    }
}
