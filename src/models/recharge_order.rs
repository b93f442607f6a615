//! Recharge order model, payment method and scene types, and the
//! request/response DTOs for the recharge endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which external payment provider handles an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "ALIPAY")]
    Alipay,
    #[serde(rename = "WECHAT")]
    Wechat,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Alipay => "ALIPAY",
            PaymentMethod::Wechat => "WECHAT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ALIPAY" => Some(PaymentMethod::Alipay),
            "WECHAT" => Some(PaymentMethod::Wechat),
            _ => None,
        }
    }
}

/// How the payer will interact with the provider.
///
/// Determines which payment handle `create_order` asks the provider for:
/// a hosted redirect for browsers, a QR payload for wallet-app scanning,
/// or in-app prepay parameters for an embedded wallet client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayScene {
    /// Desktop or mobile browser: provider-hosted redirect URL
    #[default]
    Redirect,
    /// Wallet-app scan: QR code payload
    Qr,
    /// Embedded wallet client: in-app payment parameters
    InApp,
}

/// Order state. Monotonic: PENDING -> PAID, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "PAID")]
    Paid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
        }
    }
}

/// Represents a recharge order from the database.
///
/// # Database Table
///
/// Maps to the `recharge_orders` table. `out_trade_no` is the
/// external-facing order id quoted to the provider. Amounts are stored in
/// fen (1/100 CNY) to avoid floating point.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct RechargeOrder {
    pub out_trade_no: String,
    pub user_id: Uuid,

    /// Order amount in fen (1/100 CNY)
    pub amount_fen: i64,

    /// Coins to credit once the order is paid
    pub coins_amount: i64,

    /// 'ALIPAY' | 'WECHAT'
    pub payment_method: String,

    /// 'PENDING' | 'PAID'
    pub status: String,

    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Request body for creating a recharge order.
///
/// # JSON Example
///
/// ```json
/// {
///   "amount_cny": 10,
///   "payment_method": "WECHAT",
///   "scene": "qr"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateRechargeRequest {
    /// Amount in whole CNY
    pub amount_cny: i64,
    pub payment_method: PaymentMethod,

    #[serde(default)]
    pub scene: PayScene,
}

/// The provider-specific payment handle handed back to the client.
///
/// Exactly one of the fields is present, matching the requested scene.
#[derive(Debug, Serialize)]
pub struct PaymentHandle {
    /// Hosted redirect URL (scene = redirect)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,

    /// QR code payload to render client-side (scene = qr)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,

    /// In-app payment parameters for an embedded wallet (scene = in_app)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_pay: Option<serde_json::Value>,
}

/// Response body for order creation.
#[derive(Debug, Serialize)]
pub struct CreateRechargeResponse {
    pub out_trade_no: String,
    pub amount_cny: i64,
    pub coins_amount: i64,

    #[serde(flatten)]
    pub handle: PaymentHandle,
}

/// Request body for order reconciliation.
#[derive(Debug, Deserialize)]
pub struct SyncRechargeRequest {
    pub out_trade_no: String,
}

/// Response body for order reconciliation.
///
/// # JSON Example
///
/// ```json
/// {
///   "success": true,
///   "status": "PAID",
///   "remote_status": "SUCCESS"
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct SyncRechargeResponse {
    pub success: bool,
    pub status: OrderStatus,

    /// The provider's raw status string, for client diagnostics
    pub remote_status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_method_round_trips() {
        assert_eq!(PaymentMethod::parse("ALIPAY"), Some(PaymentMethod::Alipay));
        assert_eq!(PaymentMethod::parse("WECHAT"), Some(PaymentMethod::Wechat));
        assert_eq!(PaymentMethod::parse("PAYPAL"), None);
    }

    #[test]
    fn scene_defaults_to_redirect() {
        let req: CreateRechargeRequest =
            serde_json::from_str(r#"{"amount_cny": 10, "payment_method": "WECHAT"}"#).unwrap();
        assert_eq!(req.scene, PayScene::Redirect);
    }

    #[test]
    fn handle_serializes_only_the_present_field() {
        let handle = PaymentHandle {
            payment_url: None,
            qr_code: Some("weixin://wxpay/bizpayurl?pr=abc".to_string()),
            wallet_pay: None,
        };
        let json = serde_json::to_value(&handle).unwrap();
        assert!(json.get("qr_code").is_some());
        assert!(json.get("payment_url").is_none());
        assert!(json.get("wallet_pay").is_none());
    }
}
