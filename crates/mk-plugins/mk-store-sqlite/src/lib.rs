//! # mk-store-sqlite Implementation
//!
//! Persists documents as JSON text in a single SQLite table and maps rows
//! back to `mk-core` documents. Live queries are fanned out through the
//! shared `CollectionHub`.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mk_core::{
    resolve_fields, CollectionHub, CollectionPath, DocPath, Document, DocumentStore, Fields,
    MissingDocument, Query, Subscription, WriteFields, DEFAULT_CAPACITY,
};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS documents (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    doc_id     TEXT NOT NULL,
    fields     TEXT NOT NULL,
    UNIQUE (collection, doc_id)
)";

pub struct SqliteDocumentStore {
    pool: SqlitePool,
    hub: CollectionHub,
    /// Serializes commit + publish so snapshots leave in commit order and
    /// array read-modify-writes never interleave.
    write_lock: Mutex<()>,
}

fn row_to_document(row: &SqliteRow) -> anyhow::Result<Document> {
    let fields: Fields = serde_json::from_str(&row.try_get::<String, _>("fields")?)?;
    Ok(Document {
        id: row.try_get("doc_id")?,
        fields,
        seq: row.try_get::<i64, _>("seq")? as u64,
    })
}

impl SqliteDocumentStore {
    /// Opens (creating if needed) the database at `url`,
    /// e.g. `sqlite:mask.db` or `sqlite::memory:`.
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        Self::with_capacity(url, DEFAULT_CAPACITY).await
    }

    pub async fn with_capacity(url: &str, capacity: usize) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // One long-lived connection: an in-memory database lives and dies
        // with its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        info!(url, "sqlite document store ready");

        Ok(Self {
            pool,
            hub: CollectionHub::new(capacity),
            write_lock: Mutex::new(()),
        })
    }

    /// Live subscriptions on `collection`.
    pub fn listener_count(&self, collection: &CollectionPath) -> usize {
        self.hub.listener_count(collection)
    }

    async fn run_query(&self, query: &Query) -> anyhow::Result<Vec<Document>> {
        let rows = sqlx::query("SELECT seq, doc_id, fields FROM documents WHERE collection = ?")
            .bind(query.collection.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut docs = rows
            .iter()
            .map(row_to_document)
            .collect::<anyhow::Result<Vec<_>>>()?;
        query.sort(&mut docs);
        Ok(docs)
    }

    /// Called with `write_lock` held, after the commit.
    async fn publish(&self, collection: &CollectionPath) {
        for query in self.hub.watched_queries(collection) {
            match self.run_query(&query).await {
                Ok(docs) => {
                    let reached = self.hub.publish(&query, Arc::new(docs));
                    debug!(%collection, reached, "snapshot published");
                }
                // The write itself is committed; listeners catch up on the next one.
                Err(e) => warn!(%collection, error = %e, "failed to build snapshot"),
            }
        }
    }

    async fn update_array(
        &self,
        path: &DocPath,
        field: &str,
        update: impl FnOnce(&mut Vec<Value>) + Send,
    ) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT fields FROM documents WHERE collection = ? AND doc_id = ?")
            .bind(path.collection.as_str())
            .bind(path.id.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| MissingDocument(path.to_string()))?;
        let mut fields: Fields = serde_json::from_str(&row.try_get::<String, _>("fields")?)?;

        let mut items = match fields.remove(field) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        update(&mut items);
        fields.insert(field.to_string(), Value::Array(items));

        sqlx::query("UPDATE documents SET fields = ? WHERE collection = ? AND doc_id = ?")
            .bind(serde_json::to_string(&fields)?)
            .bind(path.collection.as_str())
            .bind(path.id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.publish(&path.collection).await;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn set_document(&self, path: &DocPath, fields: WriteFields) -> anyhow::Result<()> {
        let fields = resolve_fields(fields, Utc::now().timestamp_millis());
        let _guard = self.write_lock.lock().await;

        // Upsert keeps the original row, and with it the insertion order.
        sqlx::query(
            "INSERT INTO documents (collection, doc_id, fields) VALUES (?, ?, ?)
             ON CONFLICT (collection, doc_id) DO UPDATE SET fields = excluded.fields",
        )
        .bind(path.collection.as_str())
        .bind(path.id.as_str())
        .bind(serde_json::to_string(&fields)?)
        .execute(&self.pool)
        .await?;

        self.publish(&path.collection).await;
        Ok(())
    }

    async fn add_document(
        &self,
        collection: &CollectionPath,
        fields: WriteFields,
    ) -> anyhow::Result<String> {
        let id = Uuid::now_v7().simple().to_string();
        let fields = resolve_fields(fields, Utc::now().timestamp_millis());
        let _guard = self.write_lock.lock().await;

        sqlx::query("INSERT INTO documents (collection, doc_id, fields) VALUES (?, ?, ?)")
            .bind(collection.as_str())
            .bind(id.as_str())
            .bind(serde_json::to_string(&fields)?)
            .execute(&self.pool)
            .await?;

        self.publish(collection).await;
        Ok(id)
    }

    async fn get_document(&self, path: &DocPath) -> anyhow::Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT seq, doc_id, fields FROM documents WHERE collection = ? AND doc_id = ?",
        )
        .bind(path.collection.as_str())
        .bind(path.id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn count_documents(&self, collection: &CollectionPath) -> anyhow::Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM documents WHERE collection = ?")
            .bind(collection.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")? as usize)
    }

    async fn array_union(&self, path: &DocPath, field: &str, value: Value) -> anyhow::Result<()> {
        self.update_array(path, field, |items| {
            if !items.contains(&value) {
                items.push(value);
            }
        })
        .await
    }

    async fn array_remove(
        &self,
        path: &DocPath,
        field: &str,
        value: Value,
    ) -> anyhow::Result<()> {
        self.update_array(path, field, |items| items.retain(|item| *item != value))
            .await
    }

    async fn array_append(
        &self,
        path: &DocPath,
        field: &str,
        value: Value,
    ) -> anyhow::Result<()> {
        self.update_array(path, field, |items| items.push(value)).await
    }

    async fn subscribe(&self, query: &Query) -> anyhow::Result<Subscription> {
        let receiver = self.hub.receiver(query);
        let initial = match self.run_query(query).await {
            Ok(docs) => docs,
            Err(e) => {
                drop(receiver);
                self.hub.prune(query);
                return Err(e);
            }
        };
        Ok(self
            .hub
            .subscription(query.clone(), receiver, Arc::new(initial)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mk_core::{Direction, FieldValue};
    use serde_json::json;

    fn posts() -> CollectionPath {
        CollectionPath::new("spaces/AB3DK9Q2/posts")
    }

    fn post_fields(content: &str) -> WriteFields {
        let mut fields = WriteFields::new();
        fields.insert("content".into(), json!(content).into());
        fields.insert("timestamp".into(), FieldValue::ServerTimestamp);
        fields.insert("likedBy".into(), json!([]).into());
        fields.insert("replies".into(), json!([]).into());
        fields
    }

    #[tokio::test]
    async fn test_add_and_get_document() {
        let store = SqliteDocumentStore::new("sqlite::memory:").await.unwrap();

        let id = store.add_document(&posts(), post_fields("OP")).await.unwrap();
        let doc = store.get_document(&posts().doc(&id)).await.unwrap();

        let doc = doc.expect("document should exist");
        assert_eq!(doc.get("content"), Some(&json!("OP")));
        assert!(doc.get("timestamp").unwrap().is_i64());
        assert_eq!(store.count_documents(&posts()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_document_is_idempotent() {
        let store = SqliteDocumentStore::new("sqlite::memory:").await.unwrap();
        let path = CollectionPath::new("spaces").doc("AB3DK9Q2");

        store.set_document(&path, WriteFields::new()).await.unwrap();
        store.set_document(&path, WriteFields::new()).await.unwrap();

        assert_eq!(store.count_documents(&path.collection).await.unwrap(), 1);
        assert!(store.get_document(&path).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_array_operations() {
        let store = SqliteDocumentStore::new("sqlite::memory:").await.unwrap();
        let id = store.add_document(&posts(), post_fields("OP")).await.unwrap();
        let path = posts().doc(&id);

        store.array_union(&path, "likedBy", json!("anon")).await.unwrap();
        store.array_union(&path, "likedBy", json!("anon")).await.unwrap();
        store.array_append(&path, "replies", json!({"id": "r1"})).await.unwrap();
        let doc = store.get_document(&path).await.unwrap().unwrap();
        assert_eq!(doc.get("likedBy"), Some(&json!(["anon"])));
        assert_eq!(doc.get("replies"), Some(&json!([{"id": "r1"}])));

        store.array_remove(&path, "likedBy", json!("anon")).await.unwrap();
        let doc = store.get_document(&path).await.unwrap().unwrap();
        assert_eq!(doc.get("likedBy"), Some(&json!([])));
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let store = SqliteDocumentStore::new("sqlite::memory:").await.unwrap();
        let err = store
            .array_append(&posts().doc("missing"), "replies", json!("x"))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<MissingDocument>().is_some());
    }

    #[tokio::test]
    async fn test_subscription_sees_writes_and_releases() {
        let store = SqliteDocumentStore::new("sqlite::memory:").await.unwrap();
        let query = Query::collection(posts()).order_by("timestamp", Direction::Descending);

        let mut sub = store.subscribe(&query).await.unwrap();
        assert!(sub.next().await.unwrap().is_empty());

        let id = store.add_document(&posts(), post_fields("OP")).await.unwrap();
        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);

        store
            .array_union(&posts().doc(&id), "likedBy", json!("anon"))
            .await
            .unwrap();
        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot[0].get("likedBy"), Some(&json!(["anon"])));

        sub.close();
        assert_eq!(store.listener_count(&posts()), 0);
    }

    #[tokio::test]
    async fn test_failed_subscribe_leaves_no_group_behind() {
        let store = SqliteDocumentStore::new("sqlite::memory:").await.unwrap();
        sqlx::query("INSERT INTO documents (collection, doc_id, fields) VALUES (?, ?, ?)")
            .bind(posts().as_str())
            .bind("broken")
            .bind("not json")
            .execute(&store.pool)
            .await
            .unwrap();

        let query = Query::collection(posts()).order_by("timestamp", Direction::Descending);
        assert!(store.subscribe(&query).await.is_err());
        assert!(!store.hub.is_watched(&query));
        assert_eq!(store.listener_count(&posts()), 0);
    }
}
