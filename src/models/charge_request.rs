//! Idempotent charge request model and status machine.
//!
//! One row per `(user, idempotency key)`. The status is a tagged state,
//! not scattered boolean flags, so every transition is total:
//!
//! ```text
//! absent --charge--> processing --complete--> completed
//!                        |
//!                        +--refund--> refunded
//! ```
//!
//! A row only ever comes into existence together with a successful debit
//! (both happen in one SQL transaction), which is what makes "at most one
//! net charge per key" hold under client retries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a charge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    /// Debited, downstream operation not yet finished
    Processing,
    /// Downstream operation finished, result payload cached
    Completed,
    /// Debit reversed after a downstream failure
    Refunded,
}

impl ChargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Processing => "processing",
            ChargeStatus::Completed => "completed",
            ChargeStatus::Refunded => "refunded",
        }
    }

    /// Parse a status column value. Unknown values are a data bug, not a
    /// client error, so callers treat `None` as corruption.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(ChargeStatus::Processing),
            "completed" => Some(ChargeStatus::Completed),
            "refunded" => Some(ChargeStatus::Refunded),
            _ => None,
        }
    }
}

/// Represents a charge request row from the database.
///
/// # Database Table
///
/// Maps to the `charge_requests` table, with
/// `UNIQUE (user_id, idempotency_key)`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ChargeRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub idempotency_key: String,
    pub amount: i64,
    pub status: String,

    /// How much of the debit came from the paid tranche
    pub deducted_paid: i64,

    /// How much of the debit came from the free tranche
    pub deducted_free: i64,

    /// Cached output of the paid operation, present once completed
    pub result_payload: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for the charge endpoint.
///
/// # JSON Example
///
/// ```json
/// {
///   "amount": 50,
///   "idempotency_key": "analysis-7f3a",
///   "description": "AI analysis"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct ChargeApiRequest {
    pub amount: i64,
    pub idempotency_key: String,
    pub description: String,
}

/// Request body for attaching a result payload to a charge.
#[derive(Debug, Deserialize)]
pub struct CompleteChargeRequest {
    pub payload: serde_json::Value,
}

/// Request body for refunding a charge.
#[derive(Debug, Deserialize)]
pub struct RefundChargeRequest {
    pub reason: String,
}

/// Response body for charge operations.
#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    pub request_id: Uuid,
    pub status: String,

    /// True when this response replays a previous attempt with the same key
    pub is_replay: bool,

    pub deducted_paid: i64,
    pub deducted_free: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_payload: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_column_values() {
        for status in [
            ChargeStatus::Processing,
            ChargeStatus::Completed,
            ChargeStatus::Refunded,
        ] {
            assert_eq!(ChargeStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert_eq!(ChargeStatus::parse("failed"), None);
        assert_eq!(ChargeStatus::parse(""), None);
    }
}
