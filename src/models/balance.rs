//! Balance data model and API response types.
//!
//! A balance holds two tranches:
//! - `paid_coins`: units the user purchased with real currency
//! - `free_coins`: units granted to the user (promotions, refunds, gifts)
//!
//! `total_coins` is a derived aggregate that must always equal the sum of
//! the tranches. It is stored (not computed) because the original data
//! service exposes it to read-heavy callers; the balance service repairs
//! it toward the sum if the two ever disagree.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Which tranche a credit lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tranche {
    /// Purchased units
    Paid,
    /// Granted units
    Free,
}

impl Tranche {
    /// Ledger column value for this tranche.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tranche::Paid => "PAID",
            Tranche::Free => "FREE",
        }
    }
}

/// Represents a balance record from the database.
///
/// # Database Table
///
/// Maps to the `balances` table, one row per user. Both tranches carry
/// `CHECK (>= 0)` constraints; the service layer never relies on them,
/// but they are the last line of defense.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Balance {
    pub user_id: Uuid,

    /// Purchased coins
    pub paid_coins: i64,

    /// Gifted/earned coins
    pub free_coins: i64,

    /// Derived aggregate, always paid_coins + free_coins
    pub total_coins: i64,

    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Whether the stored aggregate matches the tranche sum.
    pub fn is_consistent(&self) -> bool {
        self.total_coins == self.paid_coins + self.free_coins
    }
}

/// Response body for the balance endpoint.
///
/// # JSON Example
///
/// ```json
/// {
///   "paid_coins": 120,
///   "free_coins": 30,
///   "total_coins": 150
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub paid_coins: i64,
    pub free_coins: i64,
    pub total_coins: i64,
}

impl From<Balance> for BalanceResponse {
    fn from(balance: Balance) -> Self {
        Self {
            paid_coins: balance.paid_coins,
            free_coins: balance.free_coins,
            total_coins: balance.total_coins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn balance(paid: i64, free: i64, total: i64) -> Balance {
        Balance {
            user_id: Uuid::new_v4(),
            paid_coins: paid,
            free_coins: free,
            total_coins: total,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn aggregate_must_equal_tranche_sum() {
        assert!(balance(30, 20, 50).is_consistent());
        assert!(!balance(30, 20, 49).is_consistent());
    }
}
