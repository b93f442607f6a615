//! Post and boost models for the boost consumer.
//!
//! The content platform owns posts; this ledger only needs the author id
//! (permission check) and the `featured_until` field the boost flow
//! updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a post record from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub featured_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Represents a boost record from the database.
///
/// The original paid/free breakdown of the fee is stored so a rollback
/// can reverse the debit tranche-accurately.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostBoost {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub fee_coins: i64,
    pub deducted_paid: i64,
    pub deducted_free: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Request body for boosting a post.
///
/// # JSON Example
///
/// ```json
/// {
///   "fee_coins": 50,
///   "days": 3
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct BoostRequest {
    pub fee_coins: i64,
    pub days: i64,
}

/// Response body for a successful boost.
#[derive(Debug, Serialize)]
pub struct BoostResponse {
    pub boost_id: Uuid,
    pub post_id: Uuid,
    pub fee_coins: i64,
    pub featured_until: DateTime<Utc>,
}
