// src/store/mod.rs
//! Keyed document collections: one `<site>Posts` and one `<site>Feeds`
//! collection per site. Backends only see JSON documents and string ids.

pub mod memory;
pub mod mongo;

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;

use crate::ingest::types::{Feed, Post};
use crate::site::Site;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert, or merge the given top-level fields into an existing document.
    async fn upsert(&self, collection: &str, id: &str, doc: Value) -> Result<()>;

    async fn find(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    async fn find_all(&self, collection: &str) -> Result<Vec<Value>>;

    /// Set one field on an existing document. Returns false when no document matched.
    async fn set_field(&self, collection: &str, id: &str, field: &str, value: Value)
        -> Result<bool>;

    /// Returns false when no document matched.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    /// Create the collection if the backend needs it to exist up front.
    async fn ensure_collection(&self, _collection: &str) -> Result<()> {
        Ok(())
    }
}

pub fn posts_collection(site: Site) -> String {
    format!("{}Posts", site.name())
}

pub fn feeds_collection(site: Site) -> String {
    format!("{}Feeds", site.name())
}

/// Typed access to posts and feeds on top of a [`DocumentStore`].
#[derive(Clone)]
pub struct Store {
    docs: Arc<dyn DocumentStore>,
}

impl Store {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    pub async fn save_post(&self, post: &Post) -> Result<()> {
        let doc = serde_json::to_value(post).context("serialize post")?;
        self.docs
            .upsert(&posts_collection(post.site), &post.id, doc)
            .await
            .with_context(|| format!("save post {}/{}", post.site, post.id))
    }

    pub async fn get_post(&self, site: Site, id: &str) -> Result<Option<Post>> {
        let Some(doc) = self.docs.find(&posts_collection(site), id).await? else {
            return Ok(None);
        };
        let post = serde_json::from_value(doc)
            .with_context(|| format!("decode stored post {site}/{id}"))?;
        Ok(Some(post))
    }

    pub async fn delete_post(&self, site: Site, id: &str) -> Result<bool> {
        self.docs
            .delete(&posts_collection(site), id)
            .await
            .with_context(|| format!("delete post {site}/{id}"))
    }

    pub async fn set_post_notify(&self, site: Site, id: &str, notify: bool) -> Result<bool> {
        self.docs
            .set_field(&posts_collection(site), id, "notify", Value::Bool(notify))
            .await
            .with_context(|| format!("label post {site}/{id}"))
    }

    /// All persisted follows for a site. Undecodable documents are skipped.
    pub async fn load_feeds(&self, site: Site) -> Result<Vec<Feed>> {
        let docs = self.docs.find_all(&feeds_collection(site)).await?;
        let mut out = Vec::with_capacity(docs.len());
        for d in docs {
            match serde_json::from_value::<Feed>(d) {
                Ok(f) => out.push(f),
                Err(e) => tracing::warn!(target: "store", error = %e, %site, "skipping malformed feed document"),
            }
        }
        Ok(out)
    }

    /// Insert a new follow or persist an updated cursor.
    pub async fn save_feed(&self, feed: &Feed) -> Result<()> {
        let doc = serde_json::to_value(feed).context("serialize feed")?;
        self.docs
            .upsert(&feeds_collection(feed.site), &feed.key().doc_id(), doc)
            .await
            .with_context(|| format!("save feed {}", feed.key()))
    }

    pub async fn ensure_collections(&self) -> Result<()> {
        for site in Site::ALL {
            self.docs.ensure_collection(&posts_collection(site)).await?;
            self.docs.ensure_collection(&feeds_collection(site)).await?;
        }
        Ok(())
    }
}
