//! Snapshot fan-out for live queries.
//!
//! Every distinct query gets one tokio broadcast channel; each subscriber
//! holds an independent receiver that buffers up to `capacity` snapshots.
//! Store plugins publish a freshly computed snapshot after each committed
//! write, while still ordered with respect to other writes.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::document::{CollectionPath, Query, Snapshot};
use crate::traits::{SnapshotListener, Subscription};

/// Default number of snapshots buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 64;

/// One broadcast channel shared by all subscribers of the same query.
struct BroadcastGroup {
    sender: broadcast::Sender<Snapshot>,
}

impl BroadcastGroup {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

/// Maps live queries to their broadcast groups.
///
/// Groups are created on first subscribe and removed when the last
/// listener is released.
#[derive(Clone)]
pub struct CollectionHub {
    groups: Arc<DashMap<Query, BroadcastGroup>>,
    capacity: usize,
}

impl CollectionHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            groups: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Registers a receiver for `query`.
    ///
    /// Call this before computing the initial snapshot so that no commit
    /// can fall between the two.
    pub fn receiver(&self, query: &Query) -> broadcast::Receiver<Snapshot> {
        self.groups
            .entry(query.clone())
            .or_insert_with(|| BroadcastGroup::new(self.capacity))
            .sender
            .subscribe()
    }

    /// Wraps a registered receiver into a subscription that yields
    /// `initial` first.
    pub fn subscription(
        &self,
        query: Query,
        receiver: broadcast::Receiver<Snapshot>,
        initial: Snapshot,
    ) -> Subscription {
        Subscription::new(BroadcastListener {
            initial: Some(initial),
            receiver: Some(receiver),
            query,
            groups: Arc::clone(&self.groups),
        })
    }

    /// Drops the group for `query` if no receiver is left, e.g. after a
    /// subscribe whose initial snapshot failed.
    pub fn prune(&self, query: &Query) {
        Self::prune_groups(&self.groups, query);
    }

    fn prune_groups(groups: &DashMap<Query, BroadcastGroup>, query: &Query) {
        groups.remove_if(query, |_, g| g.sender.receiver_count() == 0);
    }

    /// Whether a broadcast group exists for `query`.
    pub fn is_watched(&self, query: &Query) -> bool {
        self.groups.contains_key(query)
    }

    /// Queries on `collection` that currently have listeners.
    pub fn watched_queries(&self, collection: &CollectionPath) -> Vec<Query> {
        self.groups
            .iter()
            .filter(|g| g.key().collection == *collection && g.sender.receiver_count() > 0)
            .map(|g| g.key().clone())
            .collect()
    }

    /// Sends `snapshot` to every listener of `query`.
    /// Returns the number of receivers reached.
    pub fn publish(&self, query: &Query, snapshot: Snapshot) -> usize {
        self.groups
            .get(query)
            .map(|g| g.sender.send(snapshot).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Live listeners across all queries on `collection`.
    pub fn listener_count(&self, collection: &CollectionPath) -> usize {
        self.groups
            .iter()
            .filter(|g| g.key().collection == *collection)
            .map(|g| g.sender.receiver_count())
            .sum()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for CollectionHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

struct BroadcastListener {
    initial: Option<Snapshot>,
    receiver: Option<broadcast::Receiver<Snapshot>>,
    query: Query,
    groups: Arc<DashMap<Query, BroadcastGroup>>,
}

#[async_trait]
impl SnapshotListener for BroadcastListener {
    async fn next_snapshot(&mut self) -> Option<Snapshot> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(RecvError::Lagged(skipped)) => {
                    // Older snapshots are superseded by the ones still buffered.
                    warn!(collection = %self.query.collection, skipped, "listener lagging, skipping snapshots");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn release(&mut self) {
        self.initial = None;
        if self.receiver.take().is_some() {
            CollectionHub::prune_groups(&self.groups, &self.query);
            debug!(collection = %self.query.collection, "listener released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Direction, Document, Fields};

    fn query(path: &str) -> Query {
        Query::collection(CollectionPath::new(path)).order_by("timestamp", Direction::Descending)
    }

    fn snapshot(ids: &[&str]) -> Snapshot {
        Arc::new(
            ids.iter()
                .enumerate()
                .map(|(i, id)| Document {
                    id: id.to_string(),
                    fields: Fields::new(),
                    seq: i as u64,
                })
                .collect(),
        )
    }

    #[test]
    fn capacity_is_at_least_one() {
        assert_eq!(CollectionHub::new(0).capacity(), 1);
        assert_eq!(CollectionHub::default().capacity(), DEFAULT_CAPACITY);
    }

    #[test]
    fn abandoned_receiver_group_is_pruned() {
        let hub = CollectionHub::new(8);
        let q = query("spaces/A/posts");

        drop(hub.receiver(&q));
        assert!(hub.is_watched(&q));

        hub.prune(&q);
        assert!(!hub.is_watched(&q));
    }

    #[test]
    fn prune_keeps_groups_with_live_receivers() {
        let hub = CollectionHub::new(8);
        let q = query("spaces/A/posts");
        let _rx = hub.receiver(&q);

        hub.prune(&q);
        assert!(hub.is_watched(&q));
    }

    #[tokio::test]
    async fn initial_snapshot_comes_first() {
        let hub = CollectionHub::new(8);
        let q = query("spaces/A/posts");
        let rx = hub.receiver(&q);
        let mut sub = hub.subscription(q.clone(), rx, snapshot(&[]));

        assert_eq!(hub.publish(&q, snapshot(&["p1"])), 1);

        assert!(sub.next().await.unwrap().is_empty());
        assert_eq!(sub.next().await.unwrap()[0].id, "p1");
    }

    #[tokio::test]
    async fn fan_out_reaches_every_listener() {
        let hub = CollectionHub::new(8);
        let q = query("spaces/A/posts");
        let mut subs: Vec<_> = (0..3)
            .map(|_| {
                let rx = hub.receiver(&q);
                hub.subscription(q.clone(), rx, snapshot(&[]))
            })
            .collect();

        assert_eq!(hub.publish(&q, snapshot(&["p1"])), 3);
        for sub in subs.iter_mut() {
            sub.next().await.unwrap();
            assert_eq!(sub.next().await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn release_prunes_empty_groups() {
        let hub = CollectionHub::new(8);
        let q = query("spaces/A/posts");
        let collection = q.collection.clone();

        let rx = hub.receiver(&q);
        let mut first = hub.subscription(q.clone(), rx, snapshot(&[]));
        let rx = hub.receiver(&q);
        let second = hub.subscription(q.clone(), rx, snapshot(&[]));
        assert_eq!(hub.listener_count(&collection), 2);

        first.close();
        assert_eq!(hub.listener_count(&collection), 1);
        assert_eq!(hub.watched_queries(&collection), vec![q.clone()]);

        drop(second);
        assert_eq!(hub.listener_count(&collection), 0);
        assert!(hub.watched_queries(&collection).is_empty());
        assert_eq!(hub.publish(&q, snapshot(&["p1"])), 0);
    }

    #[tokio::test]
    async fn queries_are_isolated_by_collection() {
        let hub = CollectionHub::new(8);
        let a = query("spaces/A/posts");
        let b = query("spaces/B/posts");
        let rx = hub.receiver(&a);
        let _sub = hub.subscription(a.clone(), rx, snapshot(&[]));

        assert_eq!(hub.publish(&b, snapshot(&["p1"])), 0);
        assert!(hub.watched_queries(&b.collection).is_empty());
    }

    #[tokio::test]
    async fn lagging_listener_skips_to_buffered_snapshots() {
        let hub = CollectionHub::new(2);
        let q = query("spaces/A/posts");
        let rx = hub.receiver(&q);
        let mut sub = hub.subscription(q.clone(), rx, snapshot(&[]));
        sub.next().await.unwrap();

        for n in 1..=5 {
            let ids: Vec<String> = (0..n).map(|i| format!("p{i}")).collect();
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            hub.publish(&q, snapshot(&refs));
        }

        assert_eq!(sub.next().await.unwrap().len(), 4);
        assert_eq!(sub.next().await.unwrap().len(), 5);
    }
}
