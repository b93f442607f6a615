//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Configuration failures, each naming the specific credential at fault.
///
/// Provider credentials are optional at startup (the ledger runs fine
/// without a payment gateway configured), so these surface lazily: the
/// first recharge attempt against a missing or malformed credential fails
/// fast with the precise sub-reason instead of a generic crash.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required provider setting is absent from the environment.
    #[error("missing configuration: {0}")]
    Missing(&'static str),

    /// Private key material could not be normalized in any supported
    /// encoding (PKCS#8 PEM, PKCS#1 PEM, base64-wrapped DER).
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(&'static str),

    /// The shared AEAD secret has the wrong length.
    #[error("invalid shared secret: {0}")]
    InvalidSharedSecret(&'static str),

    /// The provider's published public key could not be parsed.
    #[error("invalid provider certificate: {0}")]
    InvalidCertificate(&'static str),
}

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and error message.
///
/// # Error Categories
///
/// - **Validation**: bad amount, bad percent split, missing field; rejected
///   before any debit is attempted
/// - **InsufficientBalance**: distinct from validation so clients can prompt
///   a recharge
/// - **IdempotencyConflict**: a replayed request whose prior attempt is in an
///   ambiguous state; surfaced rather than silently retried
/// - **Configuration**: missing/invalid provider credentials; fails fast,
///   never silently degrades
/// - **Gateway**: the external provider errored or was unreachable; "try
///   again later", distinct from "your request was rejected"
/// - **Database**: any sqlx::Error; details hidden from clients
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// API key is missing, invalid, or inactive.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Requested resource does not exist or isn't visible to the caller.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The payer's combined tranches cannot cover the requested amount.
    ///
    /// Returns HTTP 422 Unprocessable Entity. No partial debit is ever
    /// applied before this is raised.
    #[error("Insufficient balance")]
    InsufficientBalance,

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request with details.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// A retried request hit a prior attempt in an ambiguous state.
    ///
    /// Returns HTTP 409 Conflict. The message tells the client whether to
    /// wait (still processing) or check history (already submitted).
    #[error("{0}")]
    IdempotencyConflict(String),

    /// Provider credentials are missing or malformed.
    ///
    /// Returns HTTP 500. The sub-reason is logged server-side.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The external payment provider returned an error or was unreachable.
    ///
    /// Returns HTTP 502 Bad Gateway.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// An internal step failed after its preconditions passed; the
    /// message is safe to show (e.g. "the fee has been refunded").
    ///
    /// Returns HTTP 500.
    #[error("{0}")]
    Internal(String),
}

/// Convert AppError into an HTTP response.
///
/// This implementation allows Axum handlers to return `Result<T, AppError>`
/// and have errors automatically converted to proper HTTP responses.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Map each error variant to (HTTP status, error code, message)
        let (status, code, message) = match self {
            AppError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                self.to_string(),
            ),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::InsufficientBalance => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "insufficient_balance",
                self.to_string(),
            ),
            AppError::Validation(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::IdempotencyConflict(ref msg) => {
                (StatusCode::CONFLICT, "idempotency_conflict", msg.clone())
            }
            AppError::Configuration(ref err) => {
                // The sub-reason (which credential, which encoding) is for
                // operators, not API clients.
                tracing::error!("configuration error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "configuration_error",
                    "Service is not configured for this operation".to_string(),
                )
            }
            AppError::Gateway(ref msg) => (StatusCode::BAD_GATEWAY, "gateway_error", msg.clone()),
            AppError::Internal(ref msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
            ),
        };

        // Build JSON response body
        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
