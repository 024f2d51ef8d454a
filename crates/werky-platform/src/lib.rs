pub mod config;
pub mod contracts;
pub mod db;
pub mod event_bus;

pub use config::ServiceConfig;
pub use contracts::{
    CreateJobRequest, CreateUserRequest, ListJobsQuery, ListOffersQuery, ListOrdersQuery,
    ListUsersQuery, OfferAcceptedEvent, OfferDeclinedEvent, OrderStatusChangedEvent,
    SendMessageRequest, SubmitOfferRequest, UpdateOrderStatusRequest,
};
pub use db::connect_database;
pub use event_bus::{
    CHANNEL_OFFER_ACCEPTED, CHANNEL_OFFER_DECLINED, CHANNEL_ORDER_STATUS, EventBus,
};
