//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that receives request data,
//! delegates to a service, and returns a JSON response. Handlers stay
//! thin; the invariants live in the services.

/// Balance and ledger endpoints
pub mod balance;
/// Boost endpoint (feature consumer)
pub mod boost;
/// Idempotent charge endpoints
pub mod charges;
/// Liveness endpoint
pub mod health;
/// Provider asynchronous notify endpoints
pub mod notify;
/// Recharge order endpoints
pub mod recharge;
