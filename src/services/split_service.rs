//! Split transaction executor.
//!
//! One atomic debit from a payer distributed as credits to zero or more
//! beneficiaries by percentage. This is the only place true multi-party
//! atomicity exists in the system: everything lands in one SQL
//! transaction or nothing does.
//!
//! # Distribution Rules
//!
//! - Each beneficiary receives `floor(amount * percent / 100)`, credited
//!   to their **paid** tranche (their share is revenue, not a gift).
//! - Whatever is not distributed (rounding dust plus any unallocated
//!   percentage) stays with the platform and is credited to no one.
//! - The payer is debited the gross amount, free tranche first.

use crate::{
    db::DbPool,
    error::AppError,
    models::balance::Tranche,
    models::ledger::LedgerKind,
    models::split::{Beneficiary, TransactionResult},
    services::balance_service,
};
use uuid::Uuid;

/// Validate a split request before it touches the database.
///
/// Violations fail fast with a descriptive error and never reach the
/// balance store. The same rules are enforced again inside `execute`'s
/// transaction, since handlers are not the only callers.
pub fn validate(amount: i64, beneficiaries: &[Beneficiary]) -> Result<(), AppError> {
    if amount <= 0 {
        return Err(AppError::Validation("Amount must be positive".to_string()));
    }

    let mut percent_sum: i64 = 0;
    for b in beneficiaries {
        if b.percent < 0 {
            return Err(AppError::Validation(format!(
                "Beneficiary {} has negative percent {}",
                b.user_id, b.percent
            )));
        }
        percent_sum += b.percent;
    }

    if percent_sum > 100 {
        return Err(AppError::Validation(format!(
            "Beneficiary percents sum to {}, must not exceed 100",
            percent_sum
        )));
    }

    Ok(())
}

/// Plan each beneficiary's share of the gross amount.
///
/// Returns `(credits, distributed)` where `credits` pairs each
/// beneficiary with `floor(amount * percent / 100)`. Zero shares are
/// dropped: no zero-amount credits or ledger rows.
pub fn plan_distribution(amount: i64, beneficiaries: &[Beneficiary]) -> (Vec<(Uuid, i64)>, i64) {
    let mut credits = Vec::with_capacity(beneficiaries.len());
    let mut distributed = 0;

    for b in beneficiaries {
        let share = amount * b.percent / 100;
        if share > 0 {
            credits.push((b.user_id, share));
            distributed += share;
        }
    }

    (credits, distributed)
}

/// Execute a split transaction.
///
/// # Process
///
/// 1. Validate amount and percents (fail fast, no database access)
/// 2. Start a database transaction
/// 3. Lock the payer's balance and debit the gross amount, free first
/// 4. Credit each beneficiary's paid tranche with their floor share
/// 5. Record one `consume` ledger entry for the payer
/// 6. Commit, or roll back everything on any error
///
/// Callers must not assume any partial state change occurred on failure.
///
/// # Errors
///
/// - `Validation`: non-positive amount, negative percent, percents > 100
/// - `InsufficientBalance`: payer's combined tranches are short
/// - `Database`: database error occurred
pub async fn execute(
    pool: &DbPool,
    payer_id: Uuid,
    amount: i64,
    beneficiaries: &[Beneficiary],
    description: &str,
) -> Result<TransactionResult, AppError> {
    validate(amount, beneficiaries)?;

    let (credits, distributed) = plan_distribution(amount, beneficiaries);

    let mut tx = pool.begin().await?;

    let plan = balance_service::debit_in_tx(&mut tx, payer_id, amount).await?;

    for (user_id, share) in &credits {
        balance_service::credit_in_tx(&mut tx, *user_id, *share, Tranche::Paid).await?;
        balance_service::insert_ledger_entry(
            &mut tx,
            *user_id,
            *share,
            LedgerKind::Recharge,
            Some(Tranche::Paid),
            description,
        )
        .await?;
    }

    balance_service::insert_ledger_entry(
        &mut tx,
        payer_id,
        -amount,
        LedgerKind::Consume,
        None,
        description,
    )
    .await?;

    tx.commit().await?;

    // Observability only: not part of the correctness contract.
    tracing::info!(
        payer = %payer_id,
        amount,
        distributed,
        description,
        "coins consumed"
    );

    Ok(TransactionResult {
        success: true,
        deducted_paid: plan.from_paid,
        deducted_free: plan.from_free,
        distributed,
        remainder: amount - distributed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beneficiary(percent: i64) -> Beneficiary {
        Beneficiary {
            user_id: Uuid::new_v4(),
            percent,
        }
    }

    #[test]
    fn rejects_percent_sum_over_100() {
        let err = validate(100, &[beneficiary(60), beneficiary(50)]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn rejects_negative_percent() {
        let err = validate(100, &[beneficiary(-10)]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn rejects_non_positive_amount() {
        assert!(matches!(
            validate(-10, &[]).unwrap_err(),
            AppError::Validation(_)
        ));
        assert!(matches!(
            validate(0, &[]).unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[test]
    fn accepts_exactly_100_percent() {
        assert!(validate(100, &[beneficiary(60), beneficiary(40)]).is_ok());
    }

    #[test]
    fn accepts_no_beneficiaries() {
        assert!(validate(50, &[]).is_ok());
    }

    #[test]
    fn shares_are_floored() {
        let b = vec![beneficiary(33)];
        let (credits, distributed) = plan_distribution(10, &b);
        // floor(10 * 33 / 100) = 3
        assert_eq!(credits[0].1, 3);
        assert_eq!(distributed, 3);
    }

    #[test]
    fn remainder_stays_with_platform() {
        let b = vec![beneficiary(30), beneficiary(30)];
        let (_, distributed) = plan_distribution(101, &b);
        // 30 + 30 each: floor(101*30/100) = 30, twice
        assert_eq!(distributed, 60);
        assert_eq!(101 - distributed, 41);
    }

    #[test]
    fn zero_shares_are_dropped() {
        let b = vec![beneficiary(1)];
        let (credits, distributed) = plan_distribution(50, &b);
        // floor(50 * 1 / 100) = 0: no credit row at all
        assert!(credits.is_empty());
        assert_eq!(distributed, 0);
    }

    #[test]
    fn full_allocation_distributes_everything_but_dust() {
        let b = vec![beneficiary(50), beneficiary(50)];
        let (credits, distributed) = plan_distribution(99, &b);
        assert_eq!(credits.len(), 2);
        assert_eq!(credits[0].1, 49);
        assert_eq!(credits[1].1, 49);
        assert_eq!(distributed, 98);
    }
}
