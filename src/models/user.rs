//! User model for authentication.
//!
//! API keys are stored as SHA-256 hashes; the auth middleware hashes the
//! presented key and looks the user up by hash.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Represents a user record from the database.
///
/// # Database Table
///
/// Maps to the `users` table. The ledger only carries enough identity to
/// attribute balances, charges, and orders; profile data lives in the
/// content platform.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    /// Unique identifier for this user
    pub id: Uuid,

    /// SHA-256 hash of the user's API key (64 hex characters)
    pub api_key_hash: String,

    /// Display name, used in log context only
    pub display_name: String,

    /// Inactive users are rejected during authentication
    pub is_active: bool,

    /// Timestamp when this user was created
    pub created_at: DateTime<Utc>,
}
