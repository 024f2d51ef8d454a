pub mod document;
pub mod errors;
pub mod models;
pub mod store;

pub use document::{Document, Filter, OrderBy, Timestamp};
pub use errors::MarketError;
pub use models::{
    JOBS, Job, MESSAGES, OFFERS, ORDERS, Offer, OfferStatus, Order, OrderStatus, USERS, User,
};
pub use store::{DocumentStore, Subscription, WriteOp};
