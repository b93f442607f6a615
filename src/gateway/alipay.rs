//! Alipay protocol client.
//!
//! Alipay signs sorted request parameters rather than an HTTP canonical
//! message: every non-empty parameter except `sign` and `sign_type` is
//! sorted by key, joined `key=value` with `&`, and signed SHA256withRSA
//! ("RSA2"). Asynchronous notify callbacks arrive as form parameters
//! signed the same way with Alipay's published public key.

use std::collections::BTreeMap;

use serde_json::json;

use crate::config::Config;
use crate::error::{AppError, ConfigError};
use crate::gateway::signing;
use crate::models::recharge_order::{PayScene, PaymentHandle};
use rsa::{RsaPrivateKey, RsaPublicKey};

const PRODUCTION_GATEWAY: &str = "https://openapi.alipay.com/gateway.do";

/// Provider trade states that count as paid.
///
/// TRADE_FINISHED is terminal-paid (past the refund window); both map
/// to a paid order on our side.
pub fn is_paid_status(status: &str) -> bool {
    status == "TRADE_SUCCESS" || status == "TRADE_FINISHED"
}

/// Canonical signing content: sorted `key=value` pairs joined by `&`,
/// empty values and the signature fields excluded.
pub fn signing_content(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .filter(|(k, v)| !v.is_empty() && k.as_str() != "sign" && k.as_str() != "sign_type")
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Alipay open-platform client.
pub struct AlipayClient {
    app_id: String,
    private_key: RsaPrivateKey,
    alipay_public_key: RsaPublicKey,
    notify_url: String,
    gateway_url: String,
    http: reqwest::Client,
}

impl AlipayClient {
    /// Build a client from configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let private_key =
            signing::load_private_key(Config::require(&config.alipay_private_key, "ALIPAY_PRIVATE_KEY")?)?;
        let alipay_public_key =
            signing::load_public_key(Config::require(&config.alipay_public_key, "ALIPAY_PUBLIC_KEY")?)?;

        Ok(Self {
            app_id: Config::require(&config.alipay_app_id, "ALIPAY_APP_ID")?.to_string(),
            private_key,
            alipay_public_key,
            notify_url: Config::require(&config.alipay_notify_url, "ALIPAY_NOTIFY_URL")?
                .to_string(),
            gateway_url: PRODUCTION_GATEWAY.to_string(),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
        })
    }

    /// Assemble and sign the common parameter set for an API method.
    fn signed_params(&self, method: &str, biz_content: String) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("app_id".to_string(), self.app_id.clone());
        params.insert("method".to_string(), method.to_string());
        params.insert("charset".to_string(), "utf-8".to_string());
        params.insert("sign_type".to_string(), "RSA2".to_string());
        params.insert(
            "timestamp".to_string(),
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        params.insert("version".to_string(), "1.0".to_string());
        params.insert("notify_url".to_string(), self.notify_url.clone());
        params.insert("biz_content".to_string(), biz_content);

        let signature = signing::sign(&self.private_key, signing_content(&params).as_bytes());
        params.insert("sign".to_string(), signature);
        params
    }

    /// Create an order and return the handle matching the scene.
    ///
    /// - `Redirect`: `alipay.trade.page.pay`, a hosted redirect URL
    /// - `Qr`: `alipay.trade.precreate`, a QR payload
    /// - `InApp`: `alipay.trade.app.pay`, the signed order string the
    ///   embedded wallet SDK consumes
    pub async fn create_order(
        &self,
        scene: PayScene,
        out_trade_no: &str,
        amount_fen: i64,
        subject: &str,
    ) -> Result<PaymentHandle, AppError> {
        let total_amount = format_yuan(amount_fen);

        match scene {
            PayScene::Redirect => {
                let biz = json!({
                    "out_trade_no": out_trade_no,
                    "total_amount": total_amount,
                    "subject": subject,
                    "product_code": "FAST_INSTANT_TRADE_PAY",
                })
                .to_string();
                let params = self.signed_params("alipay.trade.page.pay", biz);
                Ok(PaymentHandle {
                    payment_url: Some(format!("{}?{}", self.gateway_url, encode_query(&params))),
                    qr_code: None,
                    wallet_pay: None,
                })
            }
            PayScene::Qr => {
                let biz = json!({
                    "out_trade_no": out_trade_no,
                    "total_amount": total_amount,
                    "subject": subject,
                })
                .to_string();
                let response = self
                    .call("alipay.trade.precreate", "alipay_trade_precreate_response", biz)
                    .await?;
                let qr_code = response
                    .get("qr_code")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        AppError::Gateway("provider response missing qr_code".to_string())
                    })?;
                Ok(PaymentHandle {
                    payment_url: None,
                    qr_code: Some(qr_code.to_string()),
                    wallet_pay: None,
                })
            }
            PayScene::InApp => {
                let biz = json!({
                    "out_trade_no": out_trade_no,
                    "total_amount": total_amount,
                    "subject": subject,
                    "product_code": "QUICK_MSECURITY_PAY",
                })
                .to_string();
                let params = self.signed_params("alipay.trade.app.pay", biz);
                Ok(PaymentHandle {
                    payment_url: None,
                    qr_code: None,
                    wallet_pay: Some(json!({"order_string": encode_query(&params)})),
                })
            }
        }
    }

    /// Query an order's remote trade status by our order id.
    pub async fn query_order(&self, out_trade_no: &str) -> Result<String, AppError> {
        let biz = json!({"out_trade_no": out_trade_no}).to_string();
        let response = self
            .call("alipay.trade.query", "alipay_trade_query_response", biz)
            .await?;
        response
            .get("trade_status")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| AppError::Gateway("provider response missing trade_status".to_string()))
    }

    /// Verify an asynchronous notify's signature.
    ///
    /// All received form parameters except `sign` and `sign_type`
    /// participate, sorted, joined, and checked against Alipay's
    /// published public key.
    pub fn verify_notify(&self, params: &BTreeMap<String, String>) -> bool {
        let Some(signature) = params.get("sign") else {
            return false;
        };
        let content = signing_content(params);
        signing::verify(&self.alipay_public_key, content.as_bytes(), signature)
    }

    async fn call(
        &self,
        method: &str,
        response_node: &str,
        biz_content: String,
    ) -> Result<serde_json::Value, AppError> {
        let params = self.signed_params(method, biz_content);

        let response = self
            .http
            .post(&self.gateway_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("provider unreachable: {e}")))?;

        let text = response
            .text()
            .await
            .map_err(|e| AppError::Gateway(format!("provider response unreadable: {e}")))?;

        let parsed: serde_json::Value = serde_json::from_str(&text)
            .map_err(|_| AppError::Gateway("provider response is not valid JSON".to_string()))?;

        let node = parsed
            .get(response_node)
            .cloned()
            .ok_or_else(|| AppError::Gateway(format!("provider response missing {response_node}")))?;

        match node.get("code").and_then(|v| v.as_str()) {
            Some("10000") => Ok(node),
            Some(code) => {
                let msg = node
                    .get("sub_msg")
                    .or_else(|| node.get("msg"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown provider error");
                Err(AppError::Gateway(format!("provider rejected: {code} {msg}")))
            }
            None => Err(AppError::Gateway(
                "provider response missing result code".to_string(),
            )),
        }
    }
}

/// Format fen as a yuan decimal string ("12.50").
fn format_yuan(amount_fen: i64) -> String {
    format!("{}.{:02}", amount_fen / 100, amount_fen % 100)
}

fn encode_query(params: &BTreeMap<String, String>) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::signing::test_keys::*;

    fn client() -> AlipayClient {
        let config = Config {
            database_url: String::new(),
            server_port: 0,
            coins_per_yuan: 10,
            wechat_app_id: None,
            wechat_mch_id: None,
            wechat_serial_no: None,
            wechat_private_key: None,
            wechat_api_v3_key: None,
            wechat_notify_url: None,
            alipay_app_id: Some("2021000000000001".to_string()),
            alipay_private_key: Some(PRIVATE_PKCS1_PEM.to_string()),
            alipay_public_key: Some(PUBLIC_PEM.to_string()),
            alipay_notify_url: Some("https://example.com/api/v1/notify/alipay".to_string()),
        };
        AlipayClient::from_config(&config).unwrap()
    }

    #[test]
    fn signing_content_sorts_and_skips_signature_fields() {
        let mut params = BTreeMap::new();
        params.insert("b".to_string(), "2".to_string());
        params.insert("a".to_string(), "1".to_string());
        params.insert("sign".to_string(), "xxx".to_string());
        params.insert("sign_type".to_string(), "RSA2".to_string());
        params.insert("empty".to_string(), String::new());

        assert_eq!(signing_content(&params), "a=1&b=2");
    }

    #[test]
    fn signed_params_verify_with_own_public_key() {
        let client = client();
        let params = client.signed_params("alipay.trade.query", r#"{"out_trade_no":"R1"}"#.to_string());

        // The notify verifier implements exactly the inbound half of the
        // same convention, so our own output must verify.
        assert!(client.verify_notify(&params));
    }

    #[test]
    fn tampered_notify_fails_verification() {
        let client = client();
        let mut params =
            client.signed_params("alipay.trade.query", r#"{"out_trade_no":"R1"}"#.to_string());
        params.insert("out_trade_no".to_string(), "R2".to_string());
        assert!(!client.verify_notify(&params));
    }

    #[test]
    fn notify_without_signature_fails() {
        let client = client();
        let mut params = BTreeMap::new();
        params.insert("trade_status".to_string(), "TRADE_SUCCESS".to_string());
        assert!(!client.verify_notify(&params));
    }

    #[test]
    fn paid_status_mapping() {
        assert!(is_paid_status("TRADE_SUCCESS"));
        assert!(is_paid_status("TRADE_FINISHED"));
        assert!(!is_paid_status("WAIT_BUYER_PAY"));
        assert!(!is_paid_status("TRADE_CLOSED"));
    }

    #[test]
    fn fen_formats_as_yuan() {
        assert_eq!(format_yuan(1), "0.01");
        assert_eq!(format_yuan(1000), "10.00");
        assert_eq!(format_yuan(1250), "12.50");
    }

    #[test]
    fn redirect_url_is_query_encoded() {
        let client = client();
        let params = client.signed_params("alipay.trade.page.pay", "{\"a\":1}".to_string());
        let query = encode_query(&params);
        assert!(query.contains("method=alipay.trade.page.pay"));
        assert!(!query.contains('{'));
        assert!(query.contains("%7B"));
    }
}
