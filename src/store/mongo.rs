// src/store/mongo.rs
use anyhow::{Context, Result};
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use serde_json::Value;
use std::time::Duration;

use super::DocumentStore;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// MongoDB backend. Each document's natural id is stored under `_id`.
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let mut opts = ClientOptions::parse(uri)
            .await
            .with_context(|| format!("parse mongo uri {uri}"))?;
        opts.connect_timeout = Some(CONNECT_TIMEOUT);
        opts.server_selection_timeout = Some(CONNECT_TIMEOUT);
        let client = Client::with_options(opts).context("build mongo client")?;
        tracing::info!(target: "store", database, "mongo client ready");
        Ok(Self {
            db: client.database(database),
        })
    }

    fn coll(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

fn to_json(mut d: Document) -> Value {
    d.remove("_id");
    Bson::Document(d).into_relaxed_extjson()
}

#[async_trait::async_trait]
impl DocumentStore for MongoStore {
    async fn upsert(&self, collection: &str, id: &str, doc: Value) -> Result<()> {
        let mut fields = bson::to_document(&doc).context("convert document to bson")?;
        fields.remove("_id");
        self.coll(collection)
            .update_one(doc! { "_id": id }, doc! { "$set": fields })
            .upsert(true)
            .await
            .with_context(|| format!("mongo upsert {collection}/{id}"))?;
        Ok(())
    }

    async fn find(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let found = self
            .coll(collection)
            .find_one(doc! { "_id": id })
            .await
            .with_context(|| format!("mongo find {collection}/{id}"))?;
        Ok(found.map(to_json))
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Value>> {
        let cursor = self
            .coll(collection)
            .find(doc! {})
            .await
            .with_context(|| format!("mongo find all {collection}"))?;
        let docs: Vec<Document> = cursor
            .try_collect()
            .await
            .with_context(|| format!("mongo read cursor {collection}"))?;
        Ok(docs.into_iter().map(to_json).collect())
    }

    async fn set_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<bool> {
        let mut set = Document::new();
        set.insert(field, bson::to_bson(&value).context("convert field to bson")?);
        let res = self
            .coll(collection)
            .update_one(doc! { "_id": id }, doc! { "$set": set })
            .await
            .with_context(|| format!("mongo update {collection}/{id}"))?;
        Ok(res.matched_count > 0)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let res = self
            .coll(collection)
            .delete_many(doc! { "_id": id })
            .await
            .with_context(|| format!("mongo delete {collection}/{id}"))?;
        Ok(res.deleted_count > 0)
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        let names = self
            .db
            .list_collection_names()
            .await
            .context("mongo list collections")?;
        if !names.iter().any(|n| n == collection) {
            self.db
                .create_collection(collection)
                .await
                .with_context(|| format!("mongo create {collection}"))?;
            tracing::info!(target: "store", collection, "created collection");
        }
        Ok(())
    }
}
