//! Ledger entry model.
//!
//! The ledger is append-only: one row per economic event, never mutated
//! or deleted. Reconciliation and the fallback refund path use the
//! `description` column as a natural dedupe key, so descriptions for
//! those paths always embed the order or request id.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Kind of economic event a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    /// External payment credited coins
    Recharge,
    /// A split transaction debited coins
    Consume,
    /// A compensation credited coins back
    Refund,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Recharge => "recharge",
            LedgerKind::Consume => "consume",
            LedgerKind::Refund => "refund",
        }
    }
}

/// Represents a ledger entry from the database.
///
/// # Database Table
///
/// Maps to the `ledger_entries` table. `tranche` is nullable because rows
/// written before tranche tracking carry no tranche attribution.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,

    /// Signed amount: positive for credits, negative for debits
    pub amount: i64,

    /// 'recharge' | 'consume' | 'refund'
    pub kind: String,

    /// 'PAID' | 'FREE', or NULL for legacy rows
    pub tranche: Option<String>,

    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Response body for the ledger listing endpoint.
#[derive(Debug, Serialize)]
pub struct LedgerEntryResponse {
    pub id: Uuid,
    pub amount: i64,
    pub kind: String,
    pub tranche: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<LedgerEntry> for LedgerEntryResponse {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id,
            amount: entry.amount,
            kind: entry.kind,
            tranche: entry.tranche,
            description: entry.description,
            created_at: entry.created_at,
        }
    }
}
