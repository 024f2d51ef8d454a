//! Offer/Order lifecycle manager.
//!
//! A candidate's offer starts Pending; a recruiter either declines it or
//! accepts it, which atomically creates the order under the same id. The
//! order then moves Accepted -> Delivered or Accepted -> Cancelled, both
//! terminal. The manager is a stateless transformer over the injected
//! document store: every decision is made against a fresh read.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use werky_core::{
    DocumentStore, Filter, MarketError, OFFERS, ORDERS, Offer, OfferStatus, Order, OrderBy,
    OrderStatus, Subscription, WriteOp,
};

/// Bounded retries for the collision-checked order-number draw.
const ORDER_NUMBER_ATTEMPTS: u32 = 32;

/// Candidate input for a new offer, straight off the make-offer form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferDraft {
    pub title: String,
    pub delivery_time_days: u32,
    pub revisions: u32,
    pub price: Decimal,
    pub service: String,
    pub description: String,
    pub recruiter_email: String,
    pub freelancer_email: String,
}

/// Which side of an order a listing is scoped to.
#[derive(Debug, Clone, Copy)]
pub enum OrderParty<'a> {
    Recruiter(&'a str),
    Freelancer(&'a str),
}

#[derive(Clone)]
pub struct OfferLifecycle {
    store: Arc<dyn DocumentStore>,
    draw_number: Arc<dyn Fn() -> u32 + Send + Sync>,
}

impl OfferLifecycle {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_number_source(store, || rand::thread_rng().gen_range(100_000..=999_999))
    }

    /// Replaces the random order-number draw with a caller-supplied one;
    /// tests use a fixed sequence to drive the collision path.
    pub fn with_number_source(
        store: Arc<dyn DocumentStore>,
        draw_number: impl Fn() -> u32 + Send + Sync + 'static,
    ) -> Self {
        OfferLifecycle {
            store,
            draw_number: Arc::new(draw_number),
        }
    }

    /// Validates the draft, allocates an unused 6-digit order number and
    /// persists the offer as Pending.
    pub async fn submit_offer(&self, draft: OfferDraft) -> Result<Offer, MarketError> {
        validate(&draft)?;

        let order_number = self.fresh_order_number().await?;
        let offer = Offer {
            id: order_number.to_string(),
            title: draft.title.trim().to_string(),
            delivery_time_days: draft.delivery_time_days,
            revisions: draft.revisions,
            price: draft.price,
            service: draft.service.trim().to_string(),
            description: draft.description.trim().to_string(),
            recruiter_email: draft.recruiter_email.trim().to_string(),
            freelancer_email: draft.freelancer_email.trim().to_string(),
            created_at: Utc::now(),
            order_number,
            status: OfferStatus::Pending,
        };

        self.store
            .create(OFFERS, Some(offer.id.clone()), encode(&offer)?)
            .await?;
        info!(offer_id = %offer.id, recruiter = %offer.recruiter_email, "offer submitted");
        Ok(offer)
    }

    /// Turns a pending offer into an order, atomically flipping the offer's
    /// status and creating the order under the offer's id. Accepting an
    /// already-accepted offer returns the existing order.
    pub async fn accept_offer(&self, offer_id: &str) -> Result<Order, MarketError> {
        let pending = match self.store.get(OFFERS, offer_id).await? {
            Some(doc) => {
                let offer: Offer = doc.decode()?;
                (offer.status == OfferStatus::Pending).then_some(offer)
            }
            None => None,
        };

        let Some(offer) = pending else {
            // Consumed already: idempotent success when the order exists,
            // otherwise the offer is simply gone.
            if let Some(doc) = self.store.get(ORDERS, offer_id).await? {
                return doc.decode();
            }
            return Err(MarketError::not_found(OFFERS, offer_id));
        };

        let order = Order::from_offer(offer, Utc::now());
        let batch = vec![
            WriteOp::Update {
                collection: OFFERS.to_string(),
                id: offer_id.to_string(),
                patch: json!({"status": OfferStatus::Accepted}),
            },
            WriteOp::Create {
                collection: ORDERS.to_string(),
                id: Some(order.id.clone()),
                data: encode(&order)?,
            },
        ];

        match self.store.apply(batch).await {
            Ok(()) => {
                info!(order_id = %order.id, "offer accepted");
                Ok(order)
            }
            Err(err) => {
                // A concurrent accept may have won the batch; its order is
                // the one to return.
                if let Some(doc) = self.store.get(ORDERS, offer_id).await? {
                    return doc.decode();
                }
                Err(err)
            }
        }
    }

    /// Marks a pending offer Declined. Repeated declines are no-ops; a
    /// consumed or missing offer is NotFound, since the pending
    /// precondition no longer holds.
    pub async fn decline_offer(&self, offer_id: &str) -> Result<(), MarketError> {
        let Some(doc) = self.store.get(OFFERS, offer_id).await? else {
            return Err(MarketError::not_found(OFFERS, offer_id));
        };

        let offer: Offer = doc.decode()?;
        match offer.status {
            OfferStatus::Declined => Ok(()),
            OfferStatus::Accepted => Err(MarketError::not_found(OFFERS, offer_id)),
            OfferStatus::Pending => {
                self.store
                    .update(OFFERS, offer_id, json!({"status": OfferStatus::Declined}))
                    .await?;
                info!(offer_id = %offer_id, "offer declined");
                Ok(())
            }
        }
    }

    /// Moves an order to Delivered or Cancelled. Terminal states are
    /// sticky; anything else is an invalid transition.
    pub async fn update_order_status(
        &self,
        order_id: &str,
        new_status: OrderStatus,
    ) -> Result<Order, MarketError> {
        let Some(doc) = self.store.get(ORDERS, order_id).await? else {
            return Err(MarketError::not_found(ORDERS, order_id));
        };

        let order: Order = doc.decode()?;
        if !order.status.can_transition_to(new_status) {
            return Err(MarketError::InvalidTransition {
                from: order.status,
                to: new_status,
            });
        }

        let updated = self
            .store
            .update(ORDERS, order_id, json!({"status": new_status}))
            .await?;
        info!(order_id = %order_id, status = %new_status, "order status updated");
        updated.decode()
    }

    /// The recruiter's inbox: offers still awaiting a decision.
    pub async fn pending_offers(&self, recruiter_email: &str) -> Result<Vec<Offer>, MarketError> {
        let docs = self
            .store
            .query(OFFERS, &pending_filter(recruiter_email), OrderBy::Timestamp)
            .await?;
        docs.into_iter().map(|doc| doc.decode()).collect()
    }

    /// Live feed of the recruiter's pending offers; cancelling the returned
    /// subscription releases it.
    pub async fn watch_pending_offers(
        &self,
        recruiter_email: &str,
    ) -> Result<Subscription, MarketError> {
        self.store
            .subscribe(OFFERS, &pending_filter(recruiter_email), OrderBy::Timestamp)
            .await
    }

    /// Orders visible to one side of the marketplace.
    pub async fn orders_for(&self, party: OrderParty<'_>) -> Result<Vec<Order>, MarketError> {
        let filter = match party {
            OrderParty::Recruiter(email) => Filter::eq("recruiter_email", email),
            OrderParty::Freelancer(email) => Filter::eq("freelancer_email", email),
        };
        let docs = self
            .store
            .query(ORDERS, &[filter], OrderBy::Timestamp)
            .await?;
        docs.into_iter().map(|doc| doc.decode()).collect()
    }

    async fn fresh_order_number(&self) -> Result<u32, MarketError> {
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let candidate = (self.draw_number)();
            let id = candidate.to_string();
            let taken = self.store.get(OFFERS, &id).await?.is_some()
                || self.store.get(ORDERS, &id).await?.is_some();
            if !taken {
                return Ok(candidate);
            }
        }
        Err(MarketError::Persistence(anyhow!(
            "no unused order number after {ORDER_NUMBER_ATTEMPTS} attempts"
        )))
    }
}

fn pending_filter(recruiter_email: &str) -> [Filter; 2] {
    [
        Filter::eq("recruiter_email", recruiter_email),
        Filter::eq("status", "Pending"),
    ]
}

fn validate(draft: &OfferDraft) -> Result<(), MarketError> {
    let mut missing = Vec::new();
    if draft.title.trim().is_empty() {
        missing.push("title");
    }
    if draft.delivery_time_days == 0 {
        missing.push("delivery_time_days");
    }
    if draft.price < Decimal::ZERO {
        missing.push("price");
    }
    if draft.service.trim().is_empty() {
        missing.push("service");
    }
    if draft.description.trim().is_empty() {
        missing.push("description");
    }
    if draft.recruiter_email.trim().is_empty() {
        missing.push("recruiter_email");
    }
    if draft.freelancer_email.trim().is_empty() {
        missing.push("freelancer_email");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MarketError::validation(missing))
    }
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value, MarketError> {
    serde_json::to_value(value).map_err(|err| MarketError::Persistence(err.into()))
}

#[cfg(test)]
mod tests {
    use werky_store::MemoryStore;

    use super::*;

    fn lifecycle() -> OfferLifecycle {
        OfferLifecycle::new(Arc::new(MemoryStore::new()))
    }

    fn logo_design() -> OfferDraft {
        OfferDraft {
            title: "Logo Design".to_string(),
            delivery_time_days: 5,
            revisions: 2,
            price: Decimal::from(50),
            service: "Design".to_string(),
            description: "A clean logo for the new storefront".to_string(),
            recruiter_email: "recruiter@werky.test".to_string(),
            freelancer_email: "candidate@werky.test".to_string(),
        }
    }

    fn sequenced(numbers: Vec<u32>) -> OfferLifecycle {
        let queue = std::sync::Mutex::new(numbers.into_iter());
        OfferLifecycle::with_number_source(Arc::new(MemoryStore::new()), move || {
            queue.lock().unwrap().next().unwrap()
        })
    }

    #[tokio::test]
    async fn colliding_order_number_is_redrawn() {
        let lifecycle = sequenced(vec![111_111, 111_111, 222_222]);

        let first = lifecycle.submit_offer(logo_design()).await.unwrap();
        assert_eq!(first.order_number, 111_111);

        // The second submit draws 111_111 again, sees it taken and moves on.
        let second = lifecycle.submit_offer(logo_design()).await.unwrap();
        assert_eq!(second.order_number, 222_222);
        assert_eq!(second.id, "222222");
    }

    #[tokio::test]
    async fn exhausted_number_space_surfaces_a_persistence_error() {
        let lifecycle = OfferLifecycle::with_number_source(
            Arc::new(MemoryStore::new()),
            || 333_333,
        );

        lifecycle.submit_offer(logo_design()).await.unwrap();
        let err = lifecycle.submit_offer(logo_design()).await.unwrap_err();
        assert!(matches!(err, MarketError::Persistence(_)));
    }

    #[tokio::test]
    async fn submitted_offer_round_trips_as_pending() {
        let lifecycle = lifecycle();
        let offer = lifecycle.submit_offer(logo_design()).await.unwrap();

        assert_eq!(offer.status, OfferStatus::Pending);
        assert_eq!(offer.id, offer.order_number.to_string());
        assert!((100_000..=999_999).contains(&offer.order_number));

        let pending = lifecycle.pending_offers("recruiter@werky.test").await.unwrap();
        assert_eq!(pending, vec![offer]);
    }

    #[tokio::test]
    async fn validation_lists_every_missing_field() {
        let lifecycle = lifecycle();
        let draft = OfferDraft {
            title: "  ".to_string(),
            delivery_time_days: 0,
            revisions: 0,
            price: Decimal::from(-1),
            service: String::new(),
            description: "fine".to_string(),
            recruiter_email: "recruiter@werky.test".to_string(),
            freelancer_email: String::new(),
        };

        let err = lifecycle.submit_offer(draft).await.unwrap_err();
        let MarketError::Validation { missing } = err else {
            panic!("expected validation error");
        };
        assert_eq!(
            missing,
            ["title", "delivery_time_days", "price", "service", "freelancer_email"]
        );
    }

    #[tokio::test]
    async fn accept_creates_the_order_and_clears_the_pending_set() {
        let lifecycle = lifecycle();
        let offer = lifecycle.submit_offer(logo_design()).await.unwrap();

        let order = lifecycle.accept_offer(&offer.id).await.unwrap();
        assert_eq!(order.id, offer.id);
        assert_eq!(order.status, OrderStatus::Accepted);
        assert_eq!(order.price, offer.price);
        assert_eq!(order.delivery_time_days, offer.delivery_time_days);

        assert!(lifecycle.pending_offers("recruiter@werky.test").await.unwrap().is_empty());
        let orders = lifecycle
            .orders_for(OrderParty::Recruiter("recruiter@werky.test"))
            .await
            .unwrap();
        assert_eq!(orders, vec![order.clone()]);
        let orders = lifecycle
            .orders_for(OrderParty::Freelancer("candidate@werky.test"))
            .await
            .unwrap();
        assert_eq!(orders, vec![order]);
    }

    #[tokio::test]
    async fn repeated_accept_returns_the_same_order() {
        let lifecycle = lifecycle();
        let offer = lifecycle.submit_offer(logo_design()).await.unwrap();

        let first = lifecycle.accept_offer(&offer.id).await.unwrap();
        let second = lifecycle.accept_offer(&offer.id).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn concurrent_accepts_yield_exactly_one_order() {
        let lifecycle = lifecycle();
        let offer = lifecycle.submit_offer(logo_design()).await.unwrap();

        let (a, b) = tokio::join!(
            lifecycle.accept_offer(&offer.id),
            lifecycle.accept_offer(&offer.id)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.id, b.id);

        let orders = lifecycle
            .orders_for(OrderParty::Recruiter("recruiter@werky.test"))
            .await
            .unwrap();
        assert_eq!(orders.len(), 1);
    }

    #[tokio::test]
    async fn decline_after_accept_is_not_found() {
        let lifecycle = lifecycle();
        let offer = lifecycle.submit_offer(logo_design()).await.unwrap();
        lifecycle.accept_offer(&offer.id).await.unwrap();

        let err = lifecycle.decline_offer(&offer.id).await.unwrap_err();
        assert!(matches!(err, MarketError::NotFound { .. }));
    }

    #[tokio::test]
    async fn accept_after_decline_is_not_found() {
        let lifecycle = lifecycle();
        let offer = lifecycle.submit_offer(logo_design()).await.unwrap();
        lifecycle.decline_offer(&offer.id).await.unwrap();

        let err = lifecycle.accept_offer(&offer.id).await.unwrap_err();
        assert!(matches!(err, MarketError::NotFound { .. }));
    }

    #[tokio::test]
    async fn decline_is_idempotent_and_clears_the_pending_set() {
        let lifecycle = lifecycle();
        let offer = lifecycle.submit_offer(logo_design()).await.unwrap();

        lifecycle.decline_offer(&offer.id).await.unwrap();
        lifecycle.decline_offer(&offer.id).await.unwrap();
        assert!(lifecycle.pending_offers("recruiter@werky.test").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminal_order_status_is_sticky() {
        let lifecycle = lifecycle();
        let offer = lifecycle.submit_offer(logo_design()).await.unwrap();
        lifecycle.accept_offer(&offer.id).await.unwrap();

        lifecycle
            .update_order_status(&offer.id, OrderStatus::Delivered)
            .await
            .unwrap();
        let err = lifecycle
            .update_order_status(&offer.id, OrderStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn accepted_is_never_a_target_status() {
        let lifecycle = lifecycle();
        let offer = lifecycle.submit_offer(logo_design()).await.unwrap();
        lifecycle.accept_offer(&offer.id).await.unwrap();

        let err = lifecycle
            .update_order_status(&offer.id, OrderStatus::Accepted)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn status_update_on_missing_order_is_not_found() {
        let lifecycle = lifecycle();
        let err = lifecycle
            .update_order_status("123456", OrderStatus::Delivered)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::NotFound { .. }));
    }

    #[tokio::test]
    async fn offer_to_delivered_end_to_end() {
        let lifecycle = lifecycle();
        let offer = lifecycle.submit_offer(logo_design()).await.unwrap();

        let order = lifecycle.accept_offer(&offer.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Accepted);
        assert_eq!(order.price, Decimal::from(50));
        assert_eq!(order.delivery_time_days, 5);

        lifecycle
            .update_order_status(&order.id, OrderStatus::Delivered)
            .await
            .unwrap();
        let orders = lifecycle
            .orders_for(OrderParty::Recruiter("recruiter@werky.test"))
            .await
            .unwrap();
        assert_eq!(orders[0].status, OrderStatus::Delivered);
    }

    #[tokio::test]
    async fn pending_feed_tracks_accepts() {
        let lifecycle = lifecycle();
        let mut feed = lifecycle
            .watch_pending_offers("recruiter@werky.test")
            .await
            .unwrap();
        assert!(feed.next_snapshot().await.unwrap().is_empty());

        let offer = lifecycle.submit_offer(logo_design()).await.unwrap();
        let snapshot = feed.next_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);

        lifecycle.accept_offer(&offer.id).await.unwrap();
        // The accept batch touches the offers collection once.
        let snapshot = feed.next_snapshot().await.unwrap();
        assert!(snapshot.is_empty());
    }
}
