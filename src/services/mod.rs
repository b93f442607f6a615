//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They handle database transactions, validation, and compensation.
//!
//! Only a single SQL transaction is ever atomic; every multi-step flow
//! built on top (charge gate, boost saga, reconciliation) is a sequence
//! of independent calls designed so partial failure is either harmless
//! to retry or explicitly compensated.

pub mod balance_service;
pub mod boost_service;
pub mod charge_service;
pub mod recharge_service;
pub mod refund_service;
pub mod split_service;
