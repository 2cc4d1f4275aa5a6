//! # Post Feed Synchronizer
//!
//! Projects a space's post collection into a live, newest-first list of
//! `Post`s and applies post mutations against the store.
//!
//! Mutations are single store calls; whatever they change reaches every
//! subscriber through the next snapshot, never through local state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use dashmap::DashSet;
use mk_core::{
    fields, AppError, Direction, DocumentStore, FieldValue, Identity, MissingDocument, Post,
    Query, Reply, Result, SpaceCode, Subscription, WriteFields,
};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::ids::generate_reply_id;
use crate::posts_collection;
use crate::projection::project_post;

#[derive(Clone)]
pub struct PostFeed {
    store: Arc<dyn DocumentStore>,
    identity: Identity,
    /// `{space}/{post}` keys of like toggles still waiting on the store
    in_flight: Arc<DashSet<String>>,
}

impl PostFeed {
    /// A feed acting as the anonymous identity.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_identity(store, Identity::anonymous())
    }

    pub fn with_identity(store: Arc<dyn DocumentStore>, identity: Identity) -> Self {
        Self {
            store,
            identity,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    fn posts_query(space: &SpaceCode) -> Query {
        Query::collection(posts_collection(space))
            .order_by(fields::TIMESTAMP, Direction::Descending)
    }

    /// Opens a live view of the space's posts. The first `next()` yields
    /// the current list.
    pub async fn watch(&self, space: &SpaceCode) -> Result<PostStream> {
        let subscription = self
            .store
            .subscribe(&Self::posts_query(space))
            .await
            .map_err(AppError::Store)?;

        debug!(%space, "watching posts");
        Ok(PostStream {
            subscription,
            identity: self.identity.clone(),
        })
    }

    /// Calls `on_snapshot` with every post list until the returned handle
    /// is closed or dropped. Must be called from within a tokio runtime.
    ///
    /// Callbacks run under the handle's gate, so once `close()` returns no
    /// callback is running or will start. Closing the handle from inside
    /// `on_snapshot` deadlocks.
    pub async fn subscribe_to_posts<F>(
        &self,
        space: &SpaceCode,
        mut on_snapshot: F,
    ) -> Result<FeedSubscription>
    where
        F: FnMut(Vec<Post>) + Send + 'static,
    {
        let mut stream = self.watch(space).await?;
        let open = Arc::new(Mutex::new(true));
        let gate = Arc::clone(&open);

        let task = tokio::spawn(async move {
            while let Some(posts) = stream.next().await {
                let open = lock(&gate);
                if !*open {
                    break;
                }
                on_snapshot(posts);
            }
            stream.close();
        });

        Ok(FeedSubscription {
            open,
            task: Some(task),
        })
    }

    /// Creates a post and returns its store-assigned id.
    pub async fn add_post(&self, space: &SpaceCode, content: &str) -> Result<String> {
        if content.trim().is_empty() {
            return Err(AppError::validation("post content is empty"));
        }

        let mut doc = WriteFields::new();
        doc.insert(fields::CONTENT.to_string(), json!(content).into());
        doc.insert(fields::TIMESTAMP.to_string(), FieldValue::ServerTimestamp);
        doc.insert(fields::LIKED_BY.to_string(), json!([]).into());
        doc.insert(fields::REPLIES.to_string(), json!([]).into());

        let id = self
            .store
            .add_document(&posts_collection(space), doc)
            .await
            .map_err(AppError::Store)?;

        debug!(%space, post = %id, "post added");
        Ok(id)
    }

    /// Likes `post` if the caller's copy says it is not liked, unlikes it
    /// otherwise. A toggle arriving while another for the same post is
    /// still in flight is dropped.
    pub async fn toggle_like(&self, space: &SpaceCode, post: &Post) -> Result<()> {
        self.toggle_like_by_id(space, &post.id, post.liked).await
    }

    /// `toggle_like` for callers holding only the id and the `liked` flag
    /// they last saw.
    pub async fn toggle_like_by_id(
        &self,
        space: &SpaceCode,
        post_id: &str,
        liked: bool,
    ) -> Result<()> {
        let Some(_guard) = InFlight::acquire(&self.in_flight, format!("{space}/{post_id}")) else {
            debug!(%space, post = %post_id, "like toggle already in flight, dropped");
            return Ok(());
        };

        let path = posts_collection(space).doc(post_id);
        let token = Value::from(self.identity.token());
        let result = if liked {
            self.store.array_remove(&path, fields::LIKED_BY, token).await
        } else {
            self.store.array_union(&path, fields::LIKED_BY, token).await
        };
        result.map_err(|e| store_error("Post", post_id, e))?;

        debug!(%space, post = %post_id, liked = !liked, "like toggled");
        Ok(())
    }

    /// Appends a reply to the post's reply list.
    pub async fn add_reply(&self, space: &SpaceCode, post_id: &str, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(AppError::validation("reply content is empty"));
        }

        let reply = Reply {
            id: generate_reply_id(),
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&reply)
            .map_err(|e| AppError::Store(anyhow::Error::new(e).context("encoding reply")))?;

        let path = posts_collection(space).doc(post_id);
        self.store
            .array_append(&path, fields::REPLIES, value)
            .await
            .map_err(|e| store_error("Post", post_id, e))?;

        debug!(%space, post = %post_id, reply = %reply.id, "reply added");
        Ok(())
    }
}

fn store_error(kind: &str, id: &str, err: anyhow::Error) -> AppError {
    if err.downcast_ref::<MissingDocument>().is_some() {
        AppError::not_found(kind, id)
    } else {
        AppError::Store(err)
    }
}

/// Marks a key busy for as long as the guard lives.
struct InFlight {
    set: Arc<DashSet<String>>,
    key: String,
}

impl InFlight {
    fn acquire(set: &Arc<DashSet<String>>, key: String) -> Option<Self> {
        set.insert(key.clone()).then(|| Self {
            set: Arc::clone(set),
            key,
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

/// Pull-style live post list for one space.
pub struct PostStream {
    subscription: Subscription,
    identity: Identity,
}

impl PostStream {
    /// The next complete post list, newest first. `None` once closed.
    pub async fn next(&mut self) -> Option<Vec<Post>> {
        let snapshot = self.subscription.next().await?;
        Some(
            snapshot
                .iter()
                .map(|doc| project_post(doc, &self.identity))
                .collect(),
        )
    }

    pub fn close(&mut self) {
        self.subscription.close();
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed()
    }
}

/// Handle of a callback subscription. Closing it (or dropping it) stops
/// all further callbacks and releases the store listener.
pub struct FeedSubscription {
    /// `false` once closed; held while a callback runs
    open: Arc<Mutex<bool>>,
    task: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    /// Safe to call any number of times. Waits for a callback already
    /// running to return.
    pub fn close(&mut self) {
        *lock(&self.open) = false;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        !*lock(&self.open)
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

// A panicking callback poisons the gate; the flag itself stays valid.
fn lock(gate: &Mutex<bool>) -> MutexGuard<'_, bool> {
    gate.lock().unwrap_or_else(PoisonError::into_inner)
}
