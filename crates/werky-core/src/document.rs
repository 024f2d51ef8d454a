use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::errors::MarketError;

/// Store-assigned write timestamp, strictly increasing per store instance.
/// Microseconds since the Unix epoch, bumped past the previous value when
/// the wall clock stalls, so it is always usable as a total-order sort key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_micros(micros: i64) -> Self {
        Timestamp(micros)
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }
}

/// One stored document: an opaque JSON payload plus the envelope fields the
/// store owns (id and write timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Value,
    pub ts: Timestamp,
}

impl Document {
    /// Maps the payload onto a typed model; a malformed stored document is
    /// a persistence failure, not a caller error.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, MarketError> {
        serde_json::from_value(self.data).map_err(|err| MarketError::Persistence(err.into()))
    }

    pub fn matches(&self, filters: &[Filter]) -> bool {
        filters
            .iter()
            .all(|filter| self.data.get(&filter.field) == Some(&filter.value))
    }
}

/// Equality filter on a top-level payload field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter {
            field: field.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    /// Document id order; stable but otherwise meaningless.
    #[default]
    Unspecified,
    /// Ascending envelope timestamp, the conversation feed order.
    Timestamp,
}
