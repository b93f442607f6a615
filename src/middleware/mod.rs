//! HTTP middleware components.
//!
//! Middleware are functions that run before route handlers. They can
//! authenticate requests, log them, or short-circuit unauthorized ones.

/// API key authentication middleware
pub mod auth;
