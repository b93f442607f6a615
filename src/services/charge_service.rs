//! Idempotent charge gate.
//!
//! Wraps the debit path for paid, retryable client operations (e.g. AI
//! analysis): a client-supplied idempotency key maps to at most one
//! charge and one cached result, no matter how many times the client
//! retries after dropped connections.
//!
//! # State machine per (user, key)
//!
//! - **absent** → charge: row inserted with status `processing` and the
//!   debit applied, both in one SQL transaction
//! - **processing** (concurrent retry) → "still processing", no new debit
//! - **completed** with payload → cached payload returned verbatim
//! - **completed** without payload / **refunded** → conflict, never a
//!   silent re-charge
//!
//! The UNIQUE (user_id, idempotency_key) constraint turns the racy
//! "check then insert" into an atomic claim: the loser of a concurrent
//! race gets a conflict on insert, rolls its debit back, and re-reads
//! the winner's row.

use crate::{
    db::DbPool,
    error::AppError,
    models::charge_request::{ChargeRequest, ChargeStatus},
    models::ledger::LedgerKind,
    services::balance_service,
};
use uuid::Uuid;

/// Outcome of a charge attempt.
#[derive(Debug)]
pub enum ChargeOutcome {
    /// A fresh debit was applied; the downstream operation may proceed.
    Charged(ChargeRequest),
    /// The same key already completed; the cached payload is returned
    /// verbatim and no new debit occurred.
    Replay(ChargeRequest),
}

/// How a replayed key should be answered, given the prior row's state.
///
/// Pure decision function so every branch of the state machine is
/// reviewable in one place.
pub fn classify_replay(status: ChargeStatus, has_payload: bool) -> Result<bool, AppError> {
    match (status, has_payload) {
        // Concurrent attempt still holds the charge: tell the caller to
        // wait rather than debit again or refund under it.
        (ChargeStatus::Processing, _) => Err(AppError::IdempotencyConflict(
            "Request is still processing, please wait".to_string(),
        )),
        // Terminal with a cached result: replay it.
        (ChargeStatus::Completed, true) => Ok(true),
        // Terminal but no result to replay: ambiguous, surface it.
        (ChargeStatus::Completed, false) => Err(AppError::IdempotencyConflict(
            "Request was already submitted, check history".to_string(),
        )),
        (ChargeStatus::Refunded, _) => Err(AppError::IdempotencyConflict(
            "Previous attempt was refunded, retry with a new key".to_string(),
        )),
    }
}

fn status_of(request: &ChargeRequest) -> Result<ChargeStatus, AppError> {
    ChargeStatus::parse(&request.status).ok_or_else(|| {
        AppError::Validation(format!("Unknown charge status '{}'", request.status))
    })
}

/// Charge a user through the idempotency gate.
///
/// # Process
///
/// 1. Validate amount and key
/// 2. Look up an existing row for (user, key); replay/conflict if found
/// 3. Otherwise debit and insert the request row in one SQL transaction
/// 4. Losing an insert race rolls the debit back and re-reads the winner
///
/// Only a successful debit brings a row into existence, so a failed
/// debit leaves nothing behind and the client may retry with a new key.
pub async fn charge(
    pool: &DbPool,
    user_id: Uuid,
    amount: i64,
    idempotency_key: &str,
    description: &str,
) -> Result<ChargeOutcome, AppError> {
    if amount <= 0 {
        return Err(AppError::Validation("Amount must be positive".to_string()));
    }
    if idempotency_key.is_empty() {
        return Err(AppError::Validation(
            "Idempotency key must not be empty".to_string(),
        ));
    }

    // Fast path: an earlier attempt with this key already exists.
    if let Some(existing) = find_request(pool, user_id, idempotency_key).await? {
        return replay(existing);
    }

    // Fresh attempt: debit and claim the key atomically.
    let mut tx = pool.begin().await?;

    let plan = balance_service::debit_in_tx(&mut tx, user_id, amount).await?;

    let inserted = sqlx::query_as::<_, ChargeRequest>(
        r#"
        INSERT INTO charge_requests (
            user_id, idempotency_key, amount, status, deducted_paid, deducted_free
        )
        VALUES ($1, $2, $3, 'processing', $4, $5)
        ON CONFLICT (user_id, idempotency_key) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(idempotency_key)
    .bind(amount)
    .bind(plan.from_paid)
    .bind(plan.from_free)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(request) = inserted else {
        // A concurrent caller claimed the key first. Undo our debit and
        // answer from their row.
        tx.rollback().await?;
        let existing = find_request(pool, user_id, idempotency_key)
            .await?
            .ok_or_else(|| {
                AppError::IdempotencyConflict(
                    "Request is still processing, please wait".to_string(),
                )
            })?;
        return replay(existing);
    };

    balance_service::insert_ledger_entry(
        &mut tx,
        user_id,
        -amount,
        LedgerKind::Consume,
        None,
        description,
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        user = %user_id,
        request = %request.id,
        amount,
        "charge applied"
    );

    Ok(ChargeOutcome::Charged(request))
}

/// Attach the downstream operation's result, transitioning
/// processing → completed.
///
/// Only a `processing` row can complete; anything else means the caller
/// lost a race with a refund or a duplicate completion and is told so.
pub async fn complete(
    pool: &DbPool,
    request_id: Uuid,
    payload: serde_json::Value,
) -> Result<ChargeRequest, AppError> {
    let updated = sqlx::query_as::<_, ChargeRequest>(
        r#"
        UPDATE charge_requests
        SET status = 'completed',
            result_payload = $2,
            updated_at = NOW()
        WHERE id = $1 AND status = 'processing'
        RETURNING *
        "#,
    )
    .bind(request_id)
    .bind(payload)
    .fetch_optional(pool)
    .await?;

    match updated {
        Some(request) => Ok(request),
        None => {
            // Distinguish "no such request" from "wrong state".
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM charge_requests WHERE id = $1)")
                    .bind(request_id)
                    .fetch_one(pool)
                    .await?;
            if exists {
                Err(AppError::IdempotencyConflict(
                    "Request is no longer processing".to_string(),
                ))
            } else {
                Err(AppError::NotFound("Charge request"))
            }
        }
    }
}

/// Fetch a charge request visible to its owner.
pub async fn get_request(
    pool: &DbPool,
    user_id: Uuid,
    request_id: Uuid,
) -> Result<ChargeRequest, AppError> {
    sqlx::query_as::<_, ChargeRequest>(
        "SELECT * FROM charge_requests WHERE id = $1 AND user_id = $2",
    )
    .bind(request_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Charge request"))
}

async fn find_request(
    pool: &DbPool,
    user_id: Uuid,
    idempotency_key: &str,
) -> Result<Option<ChargeRequest>, AppError> {
    let request = sqlx::query_as::<_, ChargeRequest>(
        "SELECT * FROM charge_requests WHERE user_id = $1 AND idempotency_key = $2",
    )
    .bind(user_id)
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await?;

    Ok(request)
}

fn replay(existing: ChargeRequest) -> Result<ChargeOutcome, AppError> {
    let status = status_of(&existing)?;
    classify_replay(status, existing.result_payload.is_some())?;
    Ok(ChargeOutcome::Replay(existing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::balance::Tranche;
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
    async fn same_key_charges_once(pool: PgPool) {
        let user = seed_user(&pool, 100, 0).await;

        let first = charge(&pool, user, 40, "k1", "analysis").await.unwrap();
        let request = match first {
            ChargeOutcome::Charged(request) => request,
            other => panic!("expected a fresh charge, got {:?}", other),
        };

        complete(&pool, request.id, serde_json::json!({"answer": 42}))
            .await
            .unwrap();

        let second = charge(&pool, user, 40, "k1", "analysis").await.unwrap();
        let replayed = match second {
            ChargeOutcome::Replay(replayed) => replayed,
            other => panic!("expected a replay, got {:?}", other),
        };
        assert_eq!(replayed.id, request.id);
        assert!(replayed.result_payload.is_some());

        // The retry must not have debited again.
        let balance = balance_service::read(&pool, user).await.unwrap();
        assert_eq!(balance.total_coins, 60);
    }

    #[sqlx::test]
    async fn retry_against_a_processing_key_does_not_debit_again(pool: PgPool) {
        let user = seed_user(&pool, 100, 0).await;

        charge(&pool, user, 40, "k1", "analysis").await.unwrap();

        let err = charge(&pool, user, 40, "k1", "analysis").await.unwrap_err();
        assert!(matches!(err, AppError::IdempotencyConflict(_)));

        let balance = balance_service::read(&pool, user).await.unwrap();
        assert_eq!(balance.total_coins, 60);
    }

    #[test]
    fn processing_replay_tells_caller_to_wait() {
        let err = classify_replay(ChargeStatus::Processing, false).unwrap_err();
        assert!(matches!(err, AppError::IdempotencyConflict(_)));
        let err = classify_replay(ChargeStatus::Processing, true).unwrap_err();
        assert!(matches!(err, AppError::IdempotencyConflict(_)));
    }

    #[test]
    fn completed_with_payload_replays() {
        assert!(classify_replay(ChargeStatus::Completed, true).unwrap());
    }

    #[test]
    fn completed_without_payload_is_a_conflict_not_a_recharge() {
        let err = classify_replay(ChargeStatus::Completed, false).unwrap_err();
        assert!(matches!(err, AppError::IdempotencyConflict(_)));
    }

    #[test]
    fn refunded_replay_requires_a_new_key() {
        let err = classify_replay(ChargeStatus::Refunded, false).unwrap_err();
        assert!(matches!(err, AppError::IdempotencyConflict(_)));
    }
}
