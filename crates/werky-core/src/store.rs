use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::document::{Document, Filter, OrderBy};
use crate::errors::MarketError;

/// One entry of an atomic batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Create {
        collection: String,
        id: Option<String>,
        data: Value,
    },
    Update {
        collection: String,
        id: String,
        patch: Value,
    },
}

/// The document-database collaborator. Implementations assign the envelope
/// timestamp on every write and deliver live feeds through [`Subscription`].
/// The domain components hold this as `Arc<dyn DocumentStore>` and keep no
/// authoritative state of their own.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Stores a new document. A generated id is used when `id` is `None`;
    /// creating over an existing id is a persistence failure.
    async fn create(
        &self,
        collection: &str,
        id: Option<String>,
        data: Value,
    ) -> Result<Document, MarketError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, MarketError>;

    /// Shallow-merges `patch` into the stored payload. Fails with
    /// [`MarketError::NotFound`] when the document is absent.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Value,
    ) -> Result<Document, MarketError>;

    /// Removes the document. Fails with [`MarketError::NotFound`] when it
    /// is absent.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), MarketError>;

    /// Point-in-time result set.
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order: OrderBy,
    ) -> Result<Vec<Document>, MarketError>;

    /// Live feed: the full current result set is delivered immediately and
    /// again after every matching change, until the subscription is
    /// cancelled.
    async fn subscribe(
        &self,
        collection: &str,
        filters: &[Filter],
        order: OrderBy,
    ) -> Result<Subscription, MarketError>;

    /// Applies the batch atomically: either every op takes effect or none
    /// does. This is the strongest primitive the collaborator offers; the
    /// lifecycle manager leans on it for accept's two-document write.
    async fn apply(&self, ops: Vec<WriteOp>) -> Result<(), MarketError>;
}

/// A cancellable live feed. Dropping the handle cancels it, so a feed can
/// never outlive the screen or task that opened it. After `cancel` returns
/// no further snapshot is observable: the watcher is deregistered, the
/// channel closed, and anything already buffered is discarded.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Vec<Document>>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        rx: mpsc::UnboundedReceiver<Vec<Document>>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Subscription {
            rx,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Next full result set, or `None` once the feed is cancelled or the
    /// store is gone.
    pub async fn next_snapshot(&mut self) -> Option<Vec<Document>> {
        self.rx.recv().await
    }

    /// Idempotent. Deregisters the watcher and silences the feed.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
