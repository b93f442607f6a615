//! Balance and ledger HTTP handlers.
//!
//! - GET /api/v1/balance - Current two-tranche balance
//! - GET /api/v1/ledger - Recent ledger entries for the caller

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::balance::BalanceResponse,
    models::ledger::{LedgerEntry, LedgerEntryResponse},
    services::balance_service,
    state::AppState,
};
use axum::{Extension, Json, extract::State};

/// Get the caller's balance.
///
/// A user who has never held coins gets an all-zero balance rather
/// than a 404.
///
/// # Response (200)
///
/// ```json
/// {
///   "paid_coins": 120,
///   "free_coins": 30,
///   "total_coins": 150
/// }
/// ```
pub async fn get_balance(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<BalanceResponse>, AppError> {
    match balance_service::read(&state.pool, auth.user_id).await {
        Ok(balance) => Ok(Json(balance.into())),
        Err(AppError::NotFound(_)) => Ok(Json(BalanceResponse {
            paid_coins: 0,
            free_coins: 0,
            total_coins: 0,
        })),
        Err(e) => Err(e),
    }
}

/// List the caller's most recent ledger entries, newest first.
pub async fn list_ledger(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<LedgerEntryResponse>>, AppError> {
    let entries = sqlx::query_as::<_, LedgerEntry>(
        "SELECT * FROM ledger_entries WHERE user_id = $1 ORDER BY created_at DESC LIMIT 50",
    )
    .bind(auth.user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(entries.into_iter().map(Into::into).collect()))
}
