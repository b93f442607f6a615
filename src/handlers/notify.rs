//! Provider asynchronous notification handlers.
//!
//! These routes are public (the providers cannot hold an API key);
//! authenticity comes from the provider signatures instead. Each
//! provider expects a specific acknowledgement body, so the handlers
//! build responses by hand rather than going through `AppError`.
//!
//! - POST /api/v1/notify/wechat - WeChat Pay v3 payment notification
//! - POST /api/v1/notify/alipay - Alipay asynchronous notify

use crate::{gateway::wechat::CallbackHeaders, services::recharge_service, state::AppState};
use axum::{
    Json,
    extract::{Form, State},
    http::{HeaderMap, StatusCode},
};
use serde_json::{Value, json};
use std::collections::BTreeMap;

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// WeChat Pay v3 payment notification.
///
/// WeChat retries until it receives `{"code": "SUCCESS"}` with HTTP
/// 2xx; anything else (including a 5xx) schedules a retry, which is
/// exactly what a transient verification or database failure wants.
pub async fn wechat_notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<Value>) {
    let callback_headers = match (
        header(&headers, "Wechatpay-Timestamp"),
        header(&headers, "Wechatpay-Nonce"),
        header(&headers, "Wechatpay-Signature"),
        header(&headers, "Wechatpay-Serial"),
    ) {
        (Some(timestamp), Some(nonce), Some(signature), Some(serial)) => CallbackHeaders {
            timestamp,
            nonce,
            signature,
            serial,
        },
        _ => {
            tracing::warn!("wechat notify missing signature headers");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"code": "FAIL", "message": "missing signature headers"})),
            );
        }
    };

    match recharge_service::handle_wechat_notify(
        &state.pool,
        &state.config,
        &state.certs,
        &callback_headers,
        &body,
    )
    .await
    {
        Ok(()) => (StatusCode::OK, Json(json!({"code": "SUCCESS"}))),
        Err(e) => {
            tracing::warn!(error = %e, "wechat notify rejected");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"code": "FAIL", "message": e.to_string()})),
            )
        }
    }
}

/// Alipay asynchronous notify.
///
/// Alipay posts form-encoded parameters and retries until it receives
/// the literal body `success`.
pub async fn alipay_notify(
    State(state): State<AppState>,
    Form(params): Form<BTreeMap<String, String>>,
) -> (StatusCode, &'static str) {
    match recharge_service::handle_alipay_notify(&state.pool, &state.config, &params).await {
        Ok(()) => (StatusCode::OK, "success"),
        Err(e) => {
            tracing::warn!(error = %e, "alipay notify rejected");
            (StatusCode::INTERNAL_SERVER_ERROR, "failure")
        }
    }
}
