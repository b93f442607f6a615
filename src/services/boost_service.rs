//! Boost consumer: spend coins to feature a post.
//!
//! The fee debit (one atomic SQL transaction) and the boost's own
//! writes are separate calls with no transaction spanning them, so this
//! service carries its own saga-style compensation: the hardest step to
//! reverse (the post update) runs last, and every earlier step has a
//! compensating action ready.
//!
//! On a late failure the boost record is rolled back and the fee is
//! refunded with the exact paid/free breakdown the debit produced; the
//! caller is told the fee was returned.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::post::{BoostRequest, BoostResponse, Post, PostBoost},
    services::{refund_service, split_service},
};

const MAX_BOOST_DAYS: i64 = 30;

/// Boost a post for a number of days.
///
/// # Process
///
/// 1. Validate the post and the caller's permission to spend on it
/// 2. Debit the fee through the split executor (platform fee, no
///    beneficiaries)
/// 3. Insert the boost record
/// 4. Update the post's featured_until
/// 5. On failure after step 3: delete the boost record, refund the fee
///    tranche-accurately, and surface an error saying so
pub async fn boost_post(
    pool: &DbPool,
    user_id: Uuid,
    post_id: Uuid,
    request: BoostRequest,
) -> Result<BoostResponse, AppError> {
    if request.fee_coins <= 0 {
        return Err(AppError::Validation("Fee must be positive".to_string()));
    }
    if request.days <= 0 || request.days > MAX_BOOST_DAYS {
        return Err(AppError::Validation(format!(
            "Boost duration must be between 1 and {MAX_BOOST_DAYS} days"
        )));
    }

    let post = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Post"))?;

    if post.author_id != user_id {
        return Err(AppError::Validation(
            "Only the author can boost a post".to_string(),
        ));
    }

    // Step 2: the fee debit. Fully applied or fully failed.
    let result = split_service::execute(
        pool,
        user_id,
        request.fee_coins,
        &[],
        &format!("boost post {post_id}"),
    )
    .await?;

    let ends_at = Utc::now() + Duration::days(request.days);

    // Step 3: boost record, storing the debit's tranche breakdown so a
    // rollback can reverse it exactly.
    let boost = sqlx::query_as::<_, PostBoost>(
        r#"
        INSERT INTO post_boosts (post_id, user_id, fee_coins, deducted_paid, deducted_free, ends_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(post_id)
    .bind(user_id)
    .bind(request.fee_coins)
    .bind(result.deducted_paid)
    .bind(result.deducted_free)
    .bind(ends_at)
    .fetch_one(pool)
    .await
    .map_err(AppError::Database);

    let boost_id = match boost {
        Ok(boost) => boost.id,
        Err(err) => {
            // Nothing of step 3 landed; only the fee needs reversing.
            compensate(pool, user_id, post_id, None, &result).await;
            return Err(boost_failed(err));
        }
    };

    // Step 4: the post update, last because it is the user-visible one.
    let updated = sqlx::query("UPDATE posts SET featured_until = $1 WHERE id = $2")
        .bind(ends_at)
        .bind(post_id)
        .execute(pool)
        .await
        .map(|r| r.rows_affected());

    match updated {
        Ok(1) => Ok(BoostResponse {
            boost_id,
            post_id,
            fee_coins: request.fee_coins,
            featured_until: ends_at,
        }),
        other => {
            let err = match other {
                Ok(_) => AppError::NotFound("Post"),
                Err(e) => AppError::Database(e),
            };
            compensate(pool, user_id, post_id, Some(boost_id), &result).await;
            Err(boost_failed(err))
        }
    }
}

/// Roll back the boost record (if any) and refund the fee.
///
/// Compensation failures are logged, never propagated: the caller's
/// error stays the original failure, and the refund is retried out of
/// band by matching the same refund description.
async fn compensate(
    pool: &DbPool,
    user_id: Uuid,
    post_id: Uuid,
    boost_id: Option<Uuid>,
    result: &crate::models::split::TransactionResult,
) {
    if let Some(boost_id) = boost_id {
        if let Err(e) = sqlx::query("DELETE FROM post_boosts WHERE id = $1")
            .bind(boost_id)
            .execute(pool)
            .await
        {
            tracing::error!(boost = %boost_id, "failed to roll back boost record: {e}");
        }
    }

    let reason = compensation_reason(post_id, boost_id);
    if let Err(e) = refund_service::refund_coins(
        pool,
        user_id,
        result.deducted_paid,
        result.deducted_free,
        &reason,
    )
    .await
    {
        tracing::error!(user = %user_id, post = %post_id, "boost refund failed: {e}");
    }
}

/// Dedupe key for a compensation credit.
///
/// Each failed attempt debited the fee separately, so the key must be
/// unique per attempt: the boost id when one was created, a fresh id
/// otherwise. Reusing a key across attempts would let the ledger dedupe
/// swallow the second attempt's refund.
fn compensation_reason(post_id: Uuid, boost_id: Option<Uuid>) -> String {
    let attempt = boost_id.unwrap_or_else(Uuid::new_v4);
    format!("boost refund {post_id} {attempt}")
}

fn boost_failed(err: AppError) -> AppError {
    tracing::error!("boost failed after fee debit, fee refunded: {err}");
    AppError::Internal("Boost failed, the fee has been refunded".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_failed_attempt_gets_its_own_refund_key() {
        let post_id = Uuid::new_v4();
        assert_ne!(
            compensation_reason(post_id, None),
            compensation_reason(post_id, None)
        );
    }

    #[test]
    fn rolled_back_boost_keeps_a_stable_refund_key() {
        let post_id = Uuid::new_v4();
        let boost_id = Uuid::new_v4();
        assert_eq!(
            compensation_reason(post_id, Some(boost_id)),
            compensation_reason(post_id, Some(boost_id))
        );
    }
}
