// src/store/memory.rs
use anyhow::Result;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::DocumentStore;

/// Process-local store for dry runs and tests. Documents are kept in id order.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, BTreeMap<String, Map<String, Value>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.inner
            .lock()
            .expect("memory store mutex poisoned")
            .get(collection)
            .map_or(0, |c| c.len())
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(&self, collection: &str, id: &str, doc: Value) -> Result<()> {
        let Value::Object(fields) = doc else {
            anyhow::bail!("document for {collection}/{id} is not an object");
        };
        let mut g = self.inner.lock().expect("memory store mutex poisoned");
        let existing = g
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default();
        for (k, v) in fields {
            existing.insert(k, v);
        }
        Ok(())
    }

    async fn find(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let g = self.inner.lock().expect("memory store mutex poisoned");
        Ok(g
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|m| Value::Object(m.clone())))
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Value>> {
        let g = self.inner.lock().expect("memory store mutex poisoned");
        Ok(g.get(collection)
            .map(|c| c.values().map(|m| Value::Object(m.clone())).collect())
            .unwrap_or_default())
    }

    async fn set_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<bool> {
        let mut g = self.inner.lock().expect("memory store mutex poisoned");
        match g.get_mut(collection).and_then(|c| c.get_mut(id)) {
            Some(doc) => {
                doc.insert(field.to_string(), value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let mut g = self.inner.lock().expect("memory store mutex poisoned");
        Ok(g.get_mut(collection)
            .and_then(|c| c.remove(id))
            .is_some())
    }
}
