use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use werky_core::{Document, Filter, OrderBy, Subscription};

/// Registry of live-feed watchers shared by both store backends. Watchers
/// are deregistered by the subscription's cancel closure, which runs from a
/// sync context (possibly `Drop`), hence the parking_lot mutex.
#[derive(Clone, Default)]
pub(crate) struct FeedRegistry {
    inner: Arc<Mutex<Registry>>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: HashMap<u64, Watcher>,
}

struct Watcher {
    collection: String,
    filters: Vec<Filter>,
    order: OrderBy,
    tx: mpsc::UnboundedSender<Vec<Document>>,
}

/// A watcher's query, captured so the store can re-evaluate it after a
/// write without holding the registry lock.
pub(crate) struct FeedQuery {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order: OrderBy,
    pub tx: mpsc::UnboundedSender<Vec<Document>>,
}

impl FeedRegistry {
    /// Registers a watcher and returns the subscription handle plus the
    /// sender used for the initial snapshot.
    pub fn register(
        &self,
        collection: &str,
        filters: &[Filter],
        order: OrderBy,
    ) -> (Subscription, mpsc::UnboundedSender<Vec<Document>>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let id = {
            let mut registry = self.inner.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.insert(
                id,
                Watcher {
                    collection: collection.to_string(),
                    filters: filters.to_vec(),
                    order,
                    tx: tx.clone(),
                },
            );
            id
        };

        let inner = Arc::clone(&self.inner);
        let subscription = Subscription::new(rx, move || {
            inner.lock().entries.remove(&id);
        });

        (subscription, tx)
    }

    /// Queries of every watcher on `collection`, for post-write delivery.
    pub fn queries_for(&self, collection: &str) -> Vec<FeedQuery> {
        let registry = self.inner.lock();
        registry
            .entries
            .values()
            .filter(|watcher| watcher.collection == collection)
            .map(|watcher| FeedQuery {
                collection: watcher.collection.clone(),
                filters: watcher.filters.clone(),
                order: watcher.order,
                tx: watcher.tx.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}
