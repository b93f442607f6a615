//! Split transaction request and result types.
//!
//! A split transaction is one atomic debit from a payer distributed as
//! credits to zero or more beneficiaries by percentage. The transaction
//! itself is ephemeral; only its ledger entries and balance effects
//! persist.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One beneficiary of a split transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct Beneficiary {
    pub user_id: Uuid,

    /// Share of the gross amount, in whole percent. Non-negative; the sum
    /// across beneficiaries must not exceed 100.
    pub percent: i64,
}

/// Outcome of a successful split transaction.
///
/// `deducted_paid + deducted_free` always equals the gross amount, and
/// `distributed + remainder` equals the gross amount as well; the
/// remainder stays with the platform.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionResult {
    pub success: bool,

    /// Portion taken from the payer's paid tranche
    pub deducted_paid: i64,

    /// Portion taken from the payer's free tranche
    pub deducted_free: i64,

    /// Total credited to beneficiaries
    pub distributed: i64,

    /// Gross amount minus distributed; retained by the platform
    pub remainder: i64,
}
