//! # Core Traits (Ports)
//!
//! Any store plugin must implement these traits to be used by the binary.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::document::{CollectionPath, DocPath, Document, Query, Snapshot, WriteFields};

/// The receiving half of a live query, supplied by a store plugin.
#[async_trait]
pub trait SnapshotListener: Send {
    /// Waits for the next snapshot. `None` once the store side is gone.
    async fn next_snapshot(&mut self) -> Option<Snapshot>;

    /// Gives the listener's resources back to the store.
    fn release(&mut self);
}

/// An owned live query. Closing it (explicitly or by dropping it) releases
/// the store listener; no snapshot is delivered afterwards.
pub struct Subscription {
    listener: Option<Box<dyn SnapshotListener>>,
}

impl Subscription {
    pub fn new(listener: impl SnapshotListener + 'static) -> Self {
        Self {
            listener: Some(Box::new(listener)),
        }
    }

    pub async fn next(&mut self) -> Option<Snapshot> {
        match self.listener.as_mut() {
            Some(listener) => listener.next_snapshot().await,
            None => None,
        }
    }

    /// Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.release();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.listener.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Document persistence and change notification contract.
///
/// Array operations must be atomic per call and safe under concurrent
/// writers. Updating a document that does not exist fails with
/// [`crate::MissingDocument`].
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates or overwrites the document at `path`.
    async fn set_document(&self, path: &DocPath, fields: WriteFields) -> anyhow::Result<()>;

    /// Creates a document with a store-assigned id and returns the id.
    async fn add_document(
        &self,
        collection: &CollectionPath,
        fields: WriteFields,
    ) -> anyhow::Result<String>;

    async fn get_document(&self, path: &DocPath) -> anyhow::Result<Option<Document>>;

    async fn count_documents(&self, collection: &CollectionPath) -> anyhow::Result<usize>;

    /// Adds `value` to a set-valued field unless already present.
    async fn array_union(&self, path: &DocPath, field: &str, value: Value) -> anyhow::Result<()>;

    /// Removes every occurrence of `value` from a set-valued field.
    async fn array_remove(&self, path: &DocPath, field: &str, value: Value)
        -> anyhow::Result<()>;

    /// Appends `value` to a sequence-valued field.
    async fn array_append(&self, path: &DocPath, field: &str, value: Value)
        -> anyhow::Result<()>;

    /// Starts a live query. The first snapshot is the current result set;
    /// a fresh one follows every change to the collection.
    async fn subscribe(&self, query: &Query) -> anyhow::Result<Subscription>;
}
