use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Collection names shared by every store-facing component.
pub const OFFERS: &str = "offers";
pub const ORDERS: &str = "orders";
pub const MESSAGES: &str = "messages";
pub const JOBS: &str = "jobs";
pub const USERS: &str = "users";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferStatus {
    Pending,
    Accepted,
    Declined,
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            OfferStatus::Pending => "Pending",
            OfferStatus::Accepted => "Accepted",
            OfferStatus::Declined => "Declined",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Accepted,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Delivered and Cancelled are sticky; nothing moves out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Accepted, OrderStatus::Delivered)
                | (OrderStatus::Accepted, OrderStatus::Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            OrderStatus::Accepted => "Accepted",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        };
        f.write_str(text)
    }
}

/// A priced proposal from a candidate to a recruiter. Created Pending and
/// immutable afterwards except for the status field. The document id equals
/// the 6-digit order number, which the accepted order inherits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub title: String,
    pub delivery_time_days: u32,
    pub revisions: u32,
    pub price: Decimal,
    pub service: String,
    pub description: String,
    pub recruiter_email: String,
    pub freelancer_email: String,
    pub created_at: DateTime<Utc>,
    pub order_number: u32,
    pub status: OfferStatus,
}

/// The accepted unit of work produced from an offer. Shares the offer's id,
/// which is what guarantees at most one order per offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub title: String,
    pub delivery_time_days: u32,
    pub revisions: u32,
    pub price: Decimal,
    pub service: String,
    pub description: String,
    pub recruiter_email: String,
    pub freelancer_email: String,
    pub created_at: DateTime<Utc>,
    pub order_number: u32,
    pub status: OrderStatus,
    pub accepted_at: DateTime<Utc>,
}

impl Order {
    pub fn from_offer(offer: Offer, accepted_at: DateTime<Utc>) -> Self {
        Order {
            id: offer.id,
            title: offer.title,
            delivery_time_days: offer.delivery_time_days,
            revisions: offer.revisions,
            price: offer.price,
            service: offer.service,
            description: offer.description,
            recruiter_email: offer.recruiter_email,
            freelancer_email: offer.freelancer_email,
            created_at: offer.created_at,
            order_number: offer.order_number,
            status: OrderStatus::Accepted,
            accepted_at,
        }
    }
}

/// A recruiter's job posting. Plain CRUD, no lifecycle. The image URL, when
/// present, is already resolved by the object-storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub budget: Decimal,
    pub recruiter_email: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Directory entry for a marketplace account. `role` is the listing key
/// ("candidate", "recruiter", "admin"); accounts carry no other state here,
/// authentication lives with an external collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub email: String,
    pub role: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}
