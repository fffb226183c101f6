pub mod db;
pub mod http;
pub mod participant;
pub mod pg_store;
pub mod retry;
pub mod status;
pub mod telemetry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use participant::{
    CancelOutcome, ConfirmOutcome, InMemoryParticipant, ParticipantError, ParticipantStore,
    Reservation, ResourceKind, TryOutcome,
};
pub use retry::{retry_until_ok, RetryPolicy};
pub use status::{EventStatus, ParticipantStatus, UnknownStatus};

/// Client-supplied purchase identifier; the idempotency key of the whole workflow.
pub type BizId = i64;

/// The purchase payload carried from the client to every participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BizData {
    pub order_id: i64,
    pub user_id: i64,
    pub item_id: i64,
    pub price: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidPayload {
    #[error("price must be positive, got {0}")]
    NonPositivePrice(i64),
    #[error("{field} must not be negative, got {value}")]
    NegativeId { field: &'static str, value: i64 },
}

impl BizData {
    pub fn biz_id(&self) -> BizId {
        self.order_id
    }

    pub fn validate(&self) -> Result<(), InvalidPayload> {
        for (field, value) in [
            ("order_id", self.order_id),
            ("user_id", self.user_id),
            ("item_id", self.item_id),
        ] {
            if value < 0 {
                return Err(InvalidPayload::NegativeId { field, value });
            }
        }
        if self.price <= 0 {
            return Err(InvalidPayload::NonPositivePrice(self.price));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_snake_case_fields() {
        let biz: BizData =
            serde_json::from_str(r#"{"order_id":7,"user_id":1,"item_id":2,"price":10}"#).unwrap();
        assert_eq!(biz.biz_id(), 7);
        assert_eq!(biz.price, 10);
    }

    #[test]
    fn validate_rejects_bad_prices_and_ids() {
        let mut biz = BizData { order_id: 1, user_id: 1, item_id: 1, price: 10 };
        assert!(biz.validate().is_ok());

        biz.price = 0;
        assert_eq!(biz.validate(), Err(InvalidPayload::NonPositivePrice(0)));

        biz.price = 10;
        biz.item_id = -3;
        assert_eq!(
            biz.validate(),
            Err(InvalidPayload::NegativeId { field: "item_id", value: -3 })
        );
    }
}
