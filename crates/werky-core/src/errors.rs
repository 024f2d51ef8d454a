use thiserror::Error;

use crate::models::OrderStatus;

/// Every fallible core operation surfaces one of these kinds; collaborator
/// I/O failures are wrapped, never swallowed, and never retried here.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("missing or invalid fields: {}", missing.join(", "))]
    Validation { missing: Vec<String> },

    #[error("{collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("order cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl MarketError {
    pub fn validation<I, S>(missing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MarketError::Validation {
            missing: missing.into_iter().map(Into::into).collect(),
        }
    }

    pub fn not_found(collection: &str, id: &str) -> Self {
        MarketError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_lists_fields_in_order() {
        let err = MarketError::validation(["title", "price"]);
        assert_eq!(err.to_string(), "missing or invalid fields: title, price");
    }

    #[test]
    fn transition_error_names_both_states() {
        let err = MarketError::InvalidTransition {
            from: OrderStatus::Delivered,
            to: OrderStatus::Cancelled,
        };
        assert_eq!(err.to_string(), "order cannot move from Delivered to Cancelled");
    }
}
