//! # mk-store-memory
//!
//! In-process implementation of `DocumentStore`.
//! Every collection sits behind its own map entry lock, so a write, its
//! array update, and the snapshot it publishes happen as one step.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use mk_core::{
    resolve_fields, CollectionHub, CollectionPath, DocPath, Document, DocumentStore,
    MissingDocument, Query, Subscription, WriteFields, DEFAULT_CAPACITY,
};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

pub struct MemoryDocumentStore {
    collections: DashMap<CollectionPath, Vec<Document>>,
    next_seq: AtomicU64,
    hub: CollectionHub,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` is the number of snapshots buffered per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            collections: DashMap::new(),
            next_seq: AtomicU64::new(1),
            hub: CollectionHub::new(capacity),
        }
    }

    /// Live subscriptions on `collection`.
    pub fn listener_count(&self, collection: &CollectionPath) -> usize {
        self.hub.listener_count(collection)
    }

    fn seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn run_query(&self, query: &Query) -> Vec<Document> {
        let mut docs = self
            .collections
            .get(&query.collection)
            .map(|docs| docs.value().clone())
            .unwrap_or_default();
        query.sort(&mut docs);
        docs
    }

    /// Must be called while the collection entry is still locked so
    /// snapshots leave in commit order.
    fn publish(&self, collection: &CollectionPath, docs: &[Document]) {
        for query in self.hub.watched_queries(collection) {
            let mut snapshot = docs.to_vec();
            query.sort(&mut snapshot);
            let reached = self.hub.publish(&query, Arc::new(snapshot));
            debug!(%collection, reached, "snapshot published");
        }
    }

    fn update_array(
        &self,
        path: &DocPath,
        field: &str,
        update: impl FnOnce(&mut Vec<Value>),
    ) -> anyhow::Result<()> {
        let mut docs = self
            .collections
            .get_mut(&path.collection)
            .ok_or_else(|| MissingDocument(path.to_string()))?;
        let doc = docs
            .iter_mut()
            .find(|d| d.id == path.id)
            .ok_or_else(|| MissingDocument(path.to_string()))?;

        // A non-array value is replaced, as a fresh array would be.
        let mut items = match doc.fields.remove(field) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        update(&mut items);
        doc.fields.insert(field.to_string(), Value::Array(items));

        self.publish(&path.collection, &docs);
        Ok(())
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn set_document(&self, path: &DocPath, fields: WriteFields) -> anyhow::Result<()> {
        let fields = resolve_fields(fields, Utc::now().timestamp_millis());
        let mut docs = self.collections.entry(path.collection.clone()).or_default();

        match docs.iter_mut().find(|d| d.id == path.id) {
            Some(doc) => doc.fields = fields,
            None => {
                let seq = self.seq();
                docs.push(Document {
                    id: path.id.clone(),
                    fields,
                    seq,
                });
            }
        }

        self.publish(&path.collection, &docs);
        Ok(())
    }

    async fn add_document(
        &self,
        collection: &CollectionPath,
        fields: WriteFields,
    ) -> anyhow::Result<String> {
        let id = Uuid::now_v7().simple().to_string();
        let fields = resolve_fields(fields, Utc::now().timestamp_millis());
        let mut docs = self.collections.entry(collection.clone()).or_default();

        let seq = self.seq();
        docs.push(Document {
            id: id.clone(),
            fields,
            seq,
        });

        self.publish(collection, &docs);
        Ok(id)
    }

    async fn get_document(&self, path: &DocPath) -> anyhow::Result<Option<Document>> {
        Ok(self
            .collections
            .get(&path.collection)
            .and_then(|docs| docs.iter().find(|d| d.id == path.id).cloned()))
    }

    async fn count_documents(&self, collection: &CollectionPath) -> anyhow::Result<usize> {
        Ok(self.collections.get(collection).map(|docs| docs.len()).unwrap_or(0))
    }

    async fn array_union(&self, path: &DocPath, field: &str, value: Value) -> anyhow::Result<()> {
        self.update_array(path, field, |items| {
            if !items.contains(&value) {
                items.push(value);
            }
        })
    }

    async fn array_remove(
        &self,
        path: &DocPath,
        field: &str,
        value: Value,
    ) -> anyhow::Result<()> {
        self.update_array(path, field, |items| items.retain(|item| *item != value))
    }

    async fn array_append(
        &self,
        path: &DocPath,
        field: &str,
        value: Value,
    ) -> anyhow::Result<()> {
        self.update_array(path, field, |items| items.push(value))
    }

    async fn subscribe(&self, query: &Query) -> anyhow::Result<Subscription> {
        let receiver = self.hub.receiver(query);
        let initial = self.run_query(query);
        Ok(self
            .hub
            .subscription(query.clone(), receiver, Arc::new(initial)))
    }
}
