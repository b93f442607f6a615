//! Recharge order HTTP handlers.
//!
//! - POST /api/v1/recharge - Create a PENDING order and payment handle
//! - POST /api/v1/recharge/sync - Reconcile one order against its provider
//!
//! There is no push channel to clients: after redirecting the payer to
//! the provider, the client polls `sync` until the order is PAID.

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::recharge_order::{CreateRechargeRequest, CreateRechargeResponse, SyncRechargeRequest, SyncRechargeResponse},
    services::recharge_service,
    state::AppState,
};
use axum::{Extension, Json, extract::State, http::StatusCode};

/// Create a recharge order.
///
/// # Request Body
///
/// ```json
/// {
///   "amount_cny": 50,
///   "payment_method": "ALIPAY",
///   "scene": "qr"
/// }
/// ```
///
/// The response carries exactly one payment handle matching the scene:
/// `payment_url`, `qr_code`, or `wallet_pay`.
pub async fn create_recharge(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateRechargeRequest>,
) -> Result<(StatusCode, Json<CreateRechargeResponse>), AppError> {
    let response = recharge_service::create_order(
        &state.pool,
        &state.config,
        &state.certs,
        auth.user_id,
        request,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Reconcile one of the caller's orders against its payment provider.
///
/// Safe to call repeatedly; the credit is applied at most once.
pub async fn sync_recharge(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<SyncRechargeRequest>,
) -> Result<Json<SyncRechargeResponse>, AppError> {
    let response = recharge_service::sync_order(
        &state.pool,
        &state.config,
        &state.certs,
        auth.user_id,
        &request.out_trade_no,
    )
    .await?;

    Ok(Json(response))
}
