//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment
//! variables into a type-safe struct.
//!
//! Payment-provider credentials are all `Option`: the ledger itself runs
//! without a gateway, and the recharge path fails fast with a specific
//! `ConfigError` when a needed credential is absent. This keeps local
//! development free of fake secrets without silently degrading production.

use serde::Deserialize;

use crate::error::ConfigError;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `COINS_PER_YUAN` (optional): recharge exchange rate, defaults to 10
/// - `WECHAT_APP_ID`, `WECHAT_MCH_ID`, `WECHAT_SERIAL_NO`,
///   `WECHAT_PRIVATE_KEY`, `WECHAT_API_V3_KEY`, `WECHAT_NOTIFY_URL`:
///   WeChat Pay v3 credentials
/// - `ALIPAY_APP_ID`, `ALIPAY_PRIVATE_KEY`, `ALIPAY_PUBLIC_KEY`,
///   `ALIPAY_NOTIFY_URL`: Alipay open-platform credentials
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    /// Coins credited per 1 CNY when an order predates coin resolution.
    #[serde(default = "default_coins_per_yuan")]
    pub coins_per_yuan: i64,

    // WeChat Pay v3
    pub wechat_app_id: Option<String>,
    pub wechat_mch_id: Option<String>,
    pub wechat_serial_no: Option<String>,
    pub wechat_private_key: Option<String>,
    pub wechat_api_v3_key: Option<String>,
    pub wechat_notify_url: Option<String>,

    // Alipay
    pub alipay_app_id: Option<String>,
    pub alipay_private_key: Option<String>,
    pub alipay_public_key: Option<String>,
    pub alipay_notify_url: Option<String>,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

/// Default recharge exchange rate: 10 coins per 1 CNY.
fn default_coins_per_yuan() -> i64 {
    10
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config
    /// struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: database_url -> DATABASE_URL
        envy::from_env::<Config>()
    }

    /// Fetch a provider credential, failing with the setting's name.
    pub fn require<'a>(
        value: &'a Option<String>,
        name: &'static str,
    ) -> Result<&'a str, ConfigError> {
        value.as_deref().ok_or(ConfigError::Missing(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_returns_value_when_present() {
        let v = Some("mch-123".to_string());
        assert_eq!(Config::require(&v, "WECHAT_MCH_ID").unwrap(), "mch-123");
    }

    #[test]
    fn require_names_the_missing_setting() {
        let err = Config::require(&None, "WECHAT_MCH_ID").unwrap_err();
        assert!(matches!(err, ConfigError::Missing("WECHAT_MCH_ID")));
    }
}
