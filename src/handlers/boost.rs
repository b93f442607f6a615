//! Post boost HTTP handler.
//!
//! - POST /api/v1/posts/{id}/boost - Pay coins to feature a post

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::post::{BoostRequest, BoostResponse},
    services::boost_service,
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

/// Boost a post the caller authored.
///
/// # Request Body
///
/// ```json
/// {
///   "fee_coins": 100,
///   "days": 7
/// }
/// ```
///
/// # Errors
///
/// - 400 Insufficient balance
/// - 404 Post not found
/// - 422 Non-positive fee, duration out of range, or not the author
/// - 500 Late failure; the fee was refunded
pub async fn boost_post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(post_id): Path<Uuid>,
    Json(request): Json<BoostRequest>,
) -> Result<(StatusCode, Json<BoostResponse>), AppError> {
    let response = boost_service::boost_post(&state.pool, auth.user_id, post_id, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}
