//! Compensation (refund) service.
//!
//! Reverses a charge when the paid operation failed after the charge
//! succeeded. Safe to call multiple times for the same request: the
//! status transition is a compare-and-set, so the second and later calls
//! observe `refunded` and do nothing.
//!
//! Two concurrent refund attempts race on that compare-and-set without
//! any cross-call lock; only one wins, the other no-ops. The narrow
//! window is accepted: policy always favors refund-over-no-refund for
//! an undelivered result.

use crate::{
    db::DbPool,
    error::AppError,
    models::ledger::LedgerKind,
    services::balance_service,
};
use uuid::Uuid;

/// Refund a charge request, tranche-accurately.
///
/// # Process
///
/// 1. Compare-and-set `status -> 'refunded'` where it isn't already,
///    returning the original paid/free deduction split
/// 2. Zero rows affected means already refunded: no-op, return Ok
/// 3. Otherwise credit `deducted_paid` back to the paid tranche and
///    `deducted_free` to the free tranche (never a blanket credit to
///    one tranche) and append a `refund` ledger entry
///
/// Everything after the CAS runs in the same SQL transaction as the CAS,
/// so a crash cannot mark a request refunded without crediting it.
pub async fn refund(pool: &DbPool, request_id: Uuid, reason: &str) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    let row: Option<(Uuid, i64, i64)> = sqlx::query_as(
        r#"
        UPDATE charge_requests
        SET status = 'refunded',
            updated_at = NOW()
        WHERE id = $1 AND status <> 'refunded'
        RETURNING user_id, deducted_paid, deducted_free
        "#,
    )
    .bind(request_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((user_id, deducted_paid, deducted_free)) = row else {
        // Already refunded (or never existed): nothing to reverse.
        tx.rollback().await?;
        tracing::debug!(request = %request_id, "refund no-op, request already refunded");
        return Ok(());
    };

    balance_service::credit_split_in_tx(&mut tx, user_id, deducted_paid, deducted_free).await?;

    balance_service::insert_ledger_entry(
        &mut tx,
        user_id,
        deducted_paid + deducted_free,
        LedgerKind::Refund,
        None,
        &format!("refund {}: {}", request_id, reason),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        request = %request_id,
        user = %user_id,
        paid = deducted_paid,
        free = deducted_free,
        reason,
        "charge refunded"
    );

    Ok(())
}

/// Direct-credit fallback refund.
///
/// Used only when the authoritative path (`refund`) cannot run, for
/// example when the failure happened before a charge request row
/// existed, as in the boost saga. Dedupes on an existing `refund` ledger
/// entry with the same description, which is a weaker guarantee than the
/// primary compare-and-set; callers must always prefer `refund` when a
/// request id exists.
pub async fn refund_coins(
    pool: &DbPool,
    user_id: Uuid,
    amount_paid: i64,
    amount_free: i64,
    reason: &str,
) -> Result<(), AppError> {
    if amount_paid < 0 || amount_free < 0 || amount_paid + amount_free == 0 {
        return Err(AppError::Validation(
            "Refund amounts must be non-negative and not both zero".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    // Best-effort dedupe by description.
    let already_refunded: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM ledger_entries
            WHERE user_id = $1 AND kind = 'refund' AND description = $2
        )
        "#,
    )
    .bind(user_id)
    .bind(reason)
    .fetch_one(&mut *tx)
    .await?;

    if already_refunded {
        tx.rollback().await?;
        tracing::debug!(user = %user_id, reason, "fallback refund no-op, ledger entry exists");
        return Ok(());
    }

    balance_service::credit_split_in_tx(&mut tx, user_id, amount_paid, amount_free).await?;

    balance_service::insert_ledger_entry(
        &mut tx,
        user_id,
        amount_paid + amount_free,
        LedgerKind::Refund,
        None,
        reason,
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        user = %user_id,
        paid = amount_paid,
        free = amount_free,
        reason,
        "fallback refund credited"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::balance::Tranche;
    use crate::services::charge_service::{self, ChargeOutcome};
    use sqlx::PgPool;

    async fn seed_user(pool: &PgPool, paid: i64, free: i64) -> Uuid {
        let user_id: Uuid = sqlx::query_scalar(
            "INSERT INTO users (api_key_hash, display_name) VALUES ($1, 'tester') RETURNING id",
        )
        .bind(Uuid::new_v4().to_string())
        .fetch_one(pool)
        .await
        .unwrap();
        if paid > 0 {
            balance_service::credit(pool, user_id, paid, Tranche::Paid, "seed")
                .await
                .unwrap();
        }
        if free > 0 {
            balance_service::credit(pool, user_id, free, Tranche::Free, "seed")
                .await
                .unwrap();
        }
        user_id
    }

    #[sqlx::test]
    async fn refund_restores_the_exact_tranches(pool: PgPool) {
        let user = seed_user(&pool, 40, 30).await;

        let outcome = charge_service::charge(&pool, user, 50, "k1", "analysis")
            .await
            .unwrap();
        let request = match outcome {
            ChargeOutcome::Charged(request) => request,
            other => panic!("expected a fresh charge, got {:?}", other),
        };
        assert_eq!(request.deducted_free, 30);
        assert_eq!(request.deducted_paid, 20);

        refund(&pool, request.id, "operation failed").await.unwrap();

        let balance = balance_service::read(&pool, user).await.unwrap();
        assert_eq!(balance.paid_coins, 40);
        assert_eq!(balance.free_coins, 30);
    }

    #[sqlx::test]
    async fn second_refund_is_a_no_op(pool: PgPool) {
        let user = seed_user(&pool, 100, 0).await;

        let outcome = charge_service::charge(&pool, user, 60, "k1", "analysis")
            .await
            .unwrap();
        let request = match outcome {
            ChargeOutcome::Charged(request) => request,
            other => panic!("expected a fresh charge, got {:?}", other),
        };

        refund(&pool, request.id, "operation failed").await.unwrap();
        refund(&pool, request.id, "operation failed").await.unwrap();

        let balance = balance_service::read(&pool, user).await.unwrap();
        assert_eq!(balance.total_coins, 100);
    }

    #[sqlx::test]
    async fn fallback_refunds_with_distinct_reasons_both_credit(pool: PgPool) {
        let user = seed_user(&pool, 0, 0).await;
        let post_id = Uuid::new_v4();

        // Two failed attempts, each with its own compensation key.
        refund_coins(&pool, user, 30, 20, &format!("boost refund {post_id} {}", Uuid::new_v4()))
            .await
            .unwrap();
        refund_coins(&pool, user, 30, 20, &format!("boost refund {post_id} {}", Uuid::new_v4()))
            .await
            .unwrap();

        let balance = balance_service::read(&pool, user).await.unwrap();
        assert_eq!(balance.total_coins, 100);
    }

    #[sqlx::test]
    async fn fallback_refund_with_the_same_reason_credits_once(pool: PgPool) {
        let user = seed_user(&pool, 0, 0).await;
        let reason = format!("boost refund {} {}", Uuid::new_v4(), Uuid::new_v4());

        refund_coins(&pool, user, 30, 20, &reason).await.unwrap();
        refund_coins(&pool, user, 30, 20, &reason).await.unwrap();

        let balance = balance_service::read(&pool, user).await.unwrap();
        assert_eq!(balance.total_coins, 50);
    }
}
