use std::cmp::max;
use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;
use werky_core::{
    Document, DocumentStore, Filter, MarketError, OrderBy, Subscription, Timestamp, WriteOp,
};

use crate::feed::FeedRegistry;

/// In-memory document store. The collaborator fake for every domain test,
/// and a real backend for embedded single-process use.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<Inner>,
    feeds: FeedRegistry,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Document>>,
    last_ts: i64,
}

impl Inner {
    fn next_ts(&mut self) -> Timestamp {
        self.last_ts = max(Utc::now().timestamp_micros(), self.last_ts + 1);
        Timestamp::from_micros(self.last_ts)
    }

    fn evaluate(&self, collection: &str, filters: &[Filter], order: OrderBy) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| doc.matches(filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if order == OrderBy::Timestamp {
            docs.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.id.cmp(&b.id)));
        }
        docs
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live watchers; lets tests assert that closing a feed
    /// actually released it.
    pub fn watcher_count(&self) -> usize {
        self.feeds.len()
    }

    fn notify(&self, inner: &Inner, collection: &str) {
        for feed in self.feeds.queries_for(collection) {
            let snapshot = inner.evaluate(&feed.collection, &feed.filters, feed.order);
            let _ = feed.tx.send(snapshot);
        }
    }
}

fn merge_patch(data: &mut Value, patch: &Value) {
    match (data, patch) {
        (Value::Object(data), Value::Object(patch)) => {
            for (key, value) in patch {
                data.insert(key.clone(), value.clone());
            }
        }
        (data, patch) => *data = patch.clone(),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(
        &self,
        collection: &str,
        id: Option<String>,
        data: Value,
    ) -> Result<Document, MarketError> {
        let mut inner = self.data.write().await;
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let docs = inner.collections.entry(collection.to_string()).or_default();
        if docs.contains_key(&id) {
            return Err(MarketError::Persistence(anyhow!(
                "{collection}/{id} already exists"
            )));
        }

        let ts = inner.next_ts();
        let doc = Document {
            id: id.clone(),
            data,
            ts,
        };
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, doc.clone());

        self.notify(&inner, collection);
        Ok(doc)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, MarketError> {
        let inner = self.data.read().await;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Value,
    ) -> Result<Document, MarketError> {
        let mut inner = self.data.write().await;
        let ts = inner.next_ts();

        let Some(doc) = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
        else {
            return Err(MarketError::not_found(collection, id));
        };

        merge_patch(&mut doc.data, &patch);
        doc.ts = ts;
        let updated = doc.clone();

        self.notify(&inner, collection);
        Ok(updated)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), MarketError> {
        let mut inner = self.data.write().await;
        let removed = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id));
        if removed.is_none() {
            return Err(MarketError::not_found(collection, id));
        }

        self.notify(&inner, collection);
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order: OrderBy,
    ) -> Result<Vec<Document>, MarketError> {
        let inner = self.data.read().await;
        Ok(inner.evaluate(collection, filters, order))
    }

    async fn subscribe(
        &self,
        collection: &str,
        filters: &[Filter],
        order: OrderBy,
    ) -> Result<Subscription, MarketError> {
        let inner = self.data.read().await;
        let (subscription, tx) = self.feeds.register(collection, filters, order);
        let _ = tx.send(inner.evaluate(collection, filters, order));
        Ok(subscription)
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> Result<(), MarketError> {
        let mut inner = self.data.write().await;

        // First pass: every op must be applicable before anything mutates.
        let mut pending: HashSet<(String, String)> = HashSet::new();
        for op in &ops {
            match op {
                WriteOp::Create {
                    collection,
                    id: Some(id),
                    ..
                } => {
                    let exists = inner
                        .collections
                        .get(collection)
                        .is_some_and(|docs| docs.contains_key(id))
                        || pending.contains(&(collection.clone(), id.clone()));
                    if exists {
                        return Err(MarketError::Persistence(anyhow!(
                            "{collection}/{id} already exists"
                        )));
                    }
                    pending.insert((collection.clone(), id.clone()));
                }
                WriteOp::Create { .. } => {}
                WriteOp::Update { collection, id, .. } => {
                    let exists = inner
                        .collections
                        .get(collection)
                        .is_some_and(|docs| docs.contains_key(id))
                        || pending.contains(&(collection.clone(), id.clone()));
                    if !exists {
                        return Err(MarketError::not_found(collection, id));
                    }
                }
            }
        }

        let mut touched: HashSet<String> = HashSet::new();
        for op in ops {
            match op {
                WriteOp::Create {
                    collection,
                    id,
                    data,
                } => {
                    let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
                    let ts = inner.next_ts();
                    inner
                        .collections
                        .entry(collection.clone())
                        .or_default()
                        .insert(id.clone(), Document { id, data, ts });
                    touched.insert(collection);
                }
                WriteOp::Update {
                    collection,
                    id,
                    patch,
                } => {
                    let ts = inner.next_ts();
                    if let Some(doc) = inner
                        .collections
                        .get_mut(&collection)
                        .and_then(|docs| docs.get_mut(&id))
                    {
                        merge_patch(&mut doc.data, &patch);
                        doc.ts = ts;
                    }
                    touched.insert(collection);
                }
            }
        }

        for collection in touched {
            self.notify(&inner, &collection);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn create_get_round_trip() {
        let store = MemoryStore::new();
        let doc = store
            .create("offers", Some("123456".to_string()), json!({"title": "Logo"}))
            .await
            .unwrap();
        assert_eq!(doc.id, "123456");

        let fetched = store.get("offers", "123456").await.unwrap().unwrap();
        assert_eq!(fetched, doc);
        assert!(store.get("offers", "999999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_generates_an_id_when_absent() {
        let store = MemoryStore::new();
        let doc = store.create("messages", None, json!({"text": "hi"})).await.unwrap();
        assert!(!doc.id.is_empty());
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let store = MemoryStore::new();
        store
            .create("offers", Some("1".to_string()), json!({}))
            .await
            .unwrap();
        let err = store
            .create("offers", Some("1".to_string()), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Persistence(_)));
    }

    #[tokio::test]
    async fn timestamps_strictly_increase() {
        let store = MemoryStore::new();
        let mut last = Timestamp::ZERO;
        for _ in 0..50 {
            let doc = store.create("messages", None, json!({})).await.unwrap();
            assert!(doc.ts > last);
            last = doc.ts;
        }
    }

    #[tokio::test]
    async fn update_merges_shallowly_and_bumps_ts() {
        let store = MemoryStore::new();
        let doc = store
            .create("offers", Some("1".to_string()), json!({"title": "Logo", "status": "Pending"}))
            .await
            .unwrap();

        let updated = store
            .update("offers", "1", json!({"status": "Declined"}))
            .await
            .unwrap();
        assert_eq!(updated.data, json!({"title": "Logo", "status": "Declined"}));
        assert!(updated.ts > doc.ts);
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.update("offers", "1", json!({})).await.unwrap_err();
        assert!(matches!(err, MarketError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_removes_the_document_and_feeds_hear_it() {
        let store = MemoryStore::new();
        store
            .create("users", Some("u1".to_string()), json!({"role": "candidate"}))
            .await
            .unwrap();

        let mut feed = store.subscribe("users", &[], OrderBy::Timestamp).await.unwrap();
        assert_eq!(feed.next_snapshot().await.unwrap().len(), 1);

        store.delete("users", "u1").await.unwrap();
        assert!(store.get("users", "u1").await.unwrap().is_none());
        assert!(feed.next_snapshot().await.unwrap().is_empty());

        let err = store.delete("users", "u1").await.unwrap_err();
        assert!(matches!(err, MarketError::NotFound { .. }));
    }

    #[tokio::test]
    async fn query_filters_and_orders_by_ts() {
        let store = MemoryStore::new();
        store
            .create("messages", Some("b".to_string()), json!({"from": "a@x", "to": "b@x"}))
            .await
            .unwrap();
        store
            .create("messages", Some("a".to_string()), json!({"from": "a@x", "to": "b@x"}))
            .await
            .unwrap();
        store
            .create("messages", Some("c".to_string()), json!({"from": "b@x", "to": "a@x"}))
            .await
            .unwrap();

        let docs = store
            .query("messages", &[Filter::eq("from", "a@x")], OrderBy::Timestamp)
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[tokio::test]
    async fn subscribe_delivers_initial_and_updated_snapshots() {
        let store = MemoryStore::new();
        store
            .create("messages", Some("m1".to_string()), json!({"from": "a@x", "to": "b@x"}))
            .await
            .unwrap();

        let mut feed = store
            .subscribe("messages", &[Filter::eq("from", "a@x")], OrderBy::Timestamp)
            .await
            .unwrap();

        let initial = feed.next_snapshot().await.unwrap();
        assert_eq!(initial.len(), 1);

        store
            .create("messages", Some("m2".to_string()), json!({"from": "a@x", "to": "b@x"}))
            .await
            .unwrap();
        let next = feed.next_snapshot().await.unwrap();
        assert_eq!(next.len(), 2);

        // A non-matching write still re-delivers the (unchanged) result set.
        store
            .create("messages", Some("m3".to_string()), json!({"from": "c@x", "to": "b@x"}))
            .await
            .unwrap();
        let next = feed.next_snapshot().await.unwrap();
        assert_eq!(next.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_subscription_stays_silent() {
        let store = MemoryStore::new();
        let mut feed = store
            .subscribe("messages", &[], OrderBy::Timestamp)
            .await
            .unwrap();
        assert_eq!(store.watcher_count(), 1);
        let _ = feed.next_snapshot().await.unwrap();

        feed.cancel();
        assert_eq!(store.watcher_count(), 0);

        store.create("messages", None, json!({"text": "hi"})).await.unwrap();
        assert!(feed.next_snapshot().await.is_none());
    }

    #[tokio::test]
    async fn dropping_a_subscription_releases_the_watcher() {
        let store = MemoryStore::new();
        {
            let _feed = store
                .subscribe("messages", &[], OrderBy::Timestamp)
                .await
                .unwrap();
            assert_eq!(store.watcher_count(), 1);
        }
        assert_eq!(store.watcher_count(), 0);
    }

    #[tokio::test]
    async fn apply_is_all_or_nothing() {
        let store = MemoryStore::new();
        store
            .create("offers", Some("1".to_string()), json!({"status": "Pending"}))
            .await
            .unwrap();

        // Second op updates a missing document: nothing may take effect.
        let err = store
            .apply(vec![
                WriteOp::Update {
                    collection: "offers".to_string(),
                    id: "1".to_string(),
                    patch: json!({"status": "Accepted"}),
                },
                WriteOp::Update {
                    collection: "orders".to_string(),
                    id: "1".to_string(),
                    patch: json!({"status": "Accepted"}),
                },
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::NotFound { .. }));

        let offer = store.get("offers", "1").await.unwrap().unwrap();
        assert_eq!(offer.data["status"], json!("Pending"));

        store
            .apply(vec![
                WriteOp::Update {
                    collection: "offers".to_string(),
                    id: "1".to_string(),
                    patch: json!({"status": "Accepted"}),
                },
                WriteOp::Create {
                    collection: "orders".to_string(),
                    id: Some("1".to_string()),
                    data: json!({"status": "Accepted"}),
                },
            ])
            .await
            .unwrap();

        assert!(store.get("orders", "1").await.unwrap().is_some());
        let offer = store.get("offers", "1").await.unwrap().unwrap();
        assert_eq!(offer.data["status"], json!("Accepted"));
    }

    #[tokio::test]
    async fn apply_rejects_duplicate_create_within_batch() {
        let store = MemoryStore::new();
        let err = store
            .apply(vec![
                WriteOp::Create {
                    collection: "orders".to_string(),
                    id: Some("1".to_string()),
                    data: json!({}),
                },
                WriteOp::Create {
                    collection: "orders".to_string(),
                    id: Some("1".to_string()),
                    data: json!({}),
                },
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Persistence(_)));
        assert!(store.get("orders", "1").await.unwrap().is_none());
    }
}
