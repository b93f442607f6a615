//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables,
//! plus the request/response types exchanged with API clients.

/// User identity and API credential model
pub mod user;
/// Two-tranche coin balance model
pub mod balance;
/// Append-only ledger entry model
pub mod ledger;
/// Idempotent charge request model and status machine
pub mod charge_request;
/// Recharge order model and payment method/scene types
pub mod recharge_order;
/// Split transaction request and result types
pub mod split;
/// Post and boost models for the boost consumer
pub mod post;
