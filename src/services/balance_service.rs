//! Balance store - two-tranche coin balances.
//!
//! This service owns all balance mutations:
//! - `credit`: add coins to one tranche
//! - `debit`: remove coins, free tranche first, paid for the remainder
//! - `read`: fetch a balance, self-healing the aggregate if it drifted
//!
//! # Atomicity Guarantees
//!
//! All balance updates happen within PostgreSQL transactions with the
//! balance row locked `FOR UPDATE`. The database ensures all-or-nothing
//! execution; a failed debit leaves both tranches untouched.

use crate::{
    db::DbPool,
    error::AppError,
    models::balance::{Balance, Tranche},
    models::ledger::LedgerKind,
};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

/// How a debit splits across the two tranches.
///
/// Pure planning type: given the current tranches and the amount, decide
/// how much comes out of each. Free coins are consumed first, the paid
/// tranche covers the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebitPlan {
    pub from_free: i64,
    pub from_paid: i64,
}

impl DebitPlan {
    /// Plan a debit of `amount` against `paid`/`free` tranches.
    ///
    /// Returns `None` when the combined tranches cannot cover the amount;
    /// no partial debit is ever planned.
    pub fn compute(paid: i64, free: i64, amount: i64) -> Option<Self> {
        if amount <= 0 || paid + free < amount {
            return None;
        }
        let from_free = free.min(amount);
        Some(Self {
            from_free,
            from_paid: amount - from_free,
        })
    }
}

/// Read a user's balance, repairing the aggregate if it drifted.
///
/// If `total_coins != paid_coins + free_coins` the store repairs the
/// aggregate to the sum; the tranches are authoritative, never the
/// aggregate. The repair is logged.
pub async fn read(pool: &DbPool, user_id: Uuid) -> Result<Balance, AppError> {
    let balance = sqlx::query_as::<_, Balance>("SELECT * FROM balances WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Balance"))?;

    if balance.is_consistent() {
        return Ok(balance);
    }

    let repaired_total = balance.paid_coins + balance.free_coins;
    tracing::warn!(
        user_id = %user_id,
        stored = balance.total_coins,
        repaired = repaired_total,
        "balance aggregate drifted from tranche sum, repairing"
    );

    let balance = sqlx::query_as::<_, Balance>(
        r#"
        UPDATE balances
        SET total_coins = paid_coins + free_coins,
            updated_at = NOW()
        WHERE user_id = $1
        RETURNING *
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(balance)
}

/// Credit coins to one tranche, recording a ledger entry.
pub async fn credit(
    pool: &DbPool,
    user_id: Uuid,
    amount: i64,
    tranche: Tranche,
    description: &str,
) -> Result<(), AppError> {
    if amount <= 0 {
        return Err(AppError::Validation("Amount must be positive".to_string()));
    }

    let mut tx = pool.begin().await?;
    credit_in_tx(&mut tx, user_id, amount, tranche).await?;
    insert_ledger_entry(
        &mut tx,
        user_id,
        amount,
        LedgerKind::Recharge,
        Some(tranche),
        description,
    )
    .await?;
    tx.commit().await?;

    Ok(())
}

/// Debit coins, free tranche first, recording a `consume` ledger entry.
///
/// Fails with `InsufficientBalance` before any update when the combined
/// tranches are short.
pub async fn debit(
    pool: &DbPool,
    user_id: Uuid,
    amount: i64,
    description: &str,
) -> Result<DebitPlan, AppError> {
    if amount <= 0 {
        return Err(AppError::Validation("Amount must be positive".to_string()));
    }

    let mut tx = pool.begin().await?;
    let plan = debit_in_tx(&mut tx, user_id, amount).await?;
    insert_ledger_entry(&mut tx, user_id, -amount, LedgerKind::Consume, None, description).await?;
    tx.commit().await?;

    Ok(plan)
}

/// Apply a credit inside an existing transaction.
///
/// Creates the balance row if the user has never held coins. The
/// aggregate is updated in the same statement so it never drifts from
/// the tranche sum at a commit point.
pub async fn credit_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    amount: i64,
    tranche: Tranche,
) -> Result<(), AppError> {
    let (paid_delta, free_delta) = match tranche {
        Tranche::Paid => (amount, 0),
        Tranche::Free => (0, amount),
    };

    sqlx::query(
        r#"
        INSERT INTO balances (user_id, paid_coins, free_coins, total_coins)
        VALUES ($1, $2, $3, $2 + $3)
        ON CONFLICT (user_id) DO UPDATE
        SET paid_coins = balances.paid_coins + $2,
            free_coins = balances.free_coins + $3,
            total_coins = balances.total_coins + $2 + $3,
            updated_at = NOW()
        "#,
    )
    .bind(user_id)
    .bind(paid_delta)
    .bind(free_delta)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Apply both tranche credits of a refund inside an existing transaction.
pub async fn credit_split_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    paid: i64,
    free: i64,
) -> Result<(), AppError> {
    if paid > 0 {
        credit_in_tx(tx, user_id, paid, Tranche::Paid).await?;
    }
    if free > 0 {
        credit_in_tx(tx, user_id, free, Tranche::Free).await?;
    }
    Ok(())
}

/// Lock the payer's balance row and apply a free-first debit inside an
/// existing transaction.
pub async fn debit_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    amount: i64,
) -> Result<DebitPlan, AppError> {
    // FOR UPDATE ensures no other transaction can modify this row until
    // we commit or roll back.
    let row: Option<(i64, i64)> = sqlx::query_as(
        "SELECT paid_coins, free_coins FROM balances WHERE user_id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;

    let (paid, free) = row.ok_or(AppError::InsufficientBalance)?;

    let plan = DebitPlan::compute(paid, free, amount).ok_or(AppError::InsufficientBalance)?;

    sqlx::query(
        r#"
        UPDATE balances
        SET paid_coins = paid_coins - $1,
            free_coins = free_coins - $2,
            total_coins = total_coins - $1 - $2,
            updated_at = NOW()
        WHERE user_id = $3
        "#,
    )
    .bind(plan.from_paid)
    .bind(plan.from_free)
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

    Ok(plan)
}

/// Append a ledger entry inside an existing transaction.
pub async fn insert_ledger_entry(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    amount: i64,
    kind: LedgerKind,
    tranche: Option<Tranche>,
    description: &str,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries (user_id, amount, kind, tranche, description)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .bind(kind.as_str())
    .bind(tranche.map(|t| t.as_str()))
    .bind(description)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
