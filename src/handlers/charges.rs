//! Idempotent charge HTTP handlers.
//!
//! - POST /api/v1/charges - Debit through the idempotency gate
//! - POST /api/v1/charges/{id}/complete - Attach the operation result
//! - POST /api/v1/charges/{id}/refund - Tranche-accurate refund

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::charge_request::{
        ChargeApiRequest, ChargeRequest, ChargeResponse, CompleteChargeRequest,
        RefundChargeRequest,
    },
    services::{charge_service, charge_service::ChargeOutcome, refund_service},
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

fn to_response(request: ChargeRequest, is_replay: bool) -> ChargeResponse {
    ChargeResponse {
        request_id: request.id,
        status: request.status,
        is_replay,
        deducted_paid: request.deducted_paid,
        deducted_free: request.deducted_free,
        result_payload: request.result_payload,
    }
}

/// Charge the caller for a retryable operation.
///
/// Replaying a completed key returns the cached result with
/// `is_replay: true` and no new debit.
///
/// # Request Body
///
/// ```json
/// {
///   "amount": 10,
///   "idempotency_key": "analysis-42",
///   "description": "AI analysis"
/// }
/// ```
///
/// # Errors
///
/// - 400 Insufficient balance
/// - 409 Key still processing, completed without payload, or refunded
/// - 422 Non-positive amount or empty key
pub async fn create_charge(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<ChargeApiRequest>,
) -> Result<(StatusCode, Json<ChargeResponse>), AppError> {
    let outcome = charge_service::charge(
        &state.pool,
        auth.user_id,
        request.amount,
        &request.idempotency_key,
        &request.description,
    )
    .await?;

    Ok(match outcome {
        ChargeOutcome::Charged(row) => (StatusCode::CREATED, Json(to_response(row, false))),
        ChargeOutcome::Replay(row) => (StatusCode::OK, Json(to_response(row, true))),
    })
}

/// Attach the downstream result to a processing charge.
pub async fn complete_charge(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<CompleteChargeRequest>,
) -> Result<Json<ChargeResponse>, AppError> {
    // Ownership gate before any state change.
    charge_service::get_request(&state.pool, auth.user_id, request_id).await?;

    let updated = charge_service::complete(&state.pool, request_id, body.payload).await?;
    Ok(Json(to_response(updated, false)))
}

/// Refund a charge, re-crediting exactly the tranches it deducted.
///
/// Idempotent: refunding an already refunded request is a no-op that
/// still returns the request in its refunded state.
pub async fn refund_charge(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<RefundChargeRequest>,
) -> Result<Json<ChargeResponse>, AppError> {
    charge_service::get_request(&state.pool, auth.user_id, request_id).await?;

    refund_service::refund(&state.pool, request_id, &body.reason).await?;

    let refunded = charge_service::get_request(&state.pool, auth.user_id, request_id).await?;
    Ok(Json(to_response(refunded, false)))
}
