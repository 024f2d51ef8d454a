use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use werky_core::OrderStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOfferRequest {
    pub title: String,
    pub delivery_time_days: u32,
    pub revisions: u32,
    pub price: Decimal,
    pub service: String,
    pub description: String,
    pub recruiter_email: String,
    pub freelancer_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub from: String,
    pub to: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub title: String,
    pub description: String,
    pub category: String,
    pub budget: Decimal,
    pub recruiter_email: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub display_name: String,
    pub email: String,
    pub role: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListOffersQuery {
    pub recruiter_email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListOrdersQuery {
    pub recruiter_email: Option<String>,
    pub freelancer_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListJobsQuery {
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferAcceptedEvent {
    pub order_id: String,
    pub recruiter_email: String,
    pub freelancer_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferDeclinedEvent {
    pub offer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusChangedEvent {
    pub order_id: String,
    pub status: OrderStatus,
}
