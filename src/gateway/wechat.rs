//! WeChat Pay v3 protocol client.
//!
//! Outbound requests carry an Authorization header signed over the
//! canonical message
//!
//! ```text
//! {method}\n{path}\n{timestamp}\n{nonce}\n{body}\n
//! ```
//!
//! Inbound callbacks are verified over `{timestamp}\n{nonce}\n{body}\n`
//! against the platform certificate named by the callback's serial
//! header; the certificate set is fetched signed-and-encrypted from the
//! provider and cached for ten minutes (see `cert_cache`).

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::error::{AppError, ConfigError};
use crate::gateway::cert_cache::{CacheLookup, CertificateCache};
use crate::gateway::{crypto, signing};
use crate::models::recharge_order::{PayScene, PaymentHandle};
use rsa::{RsaPrivateKey, RsaPublicKey};

const PRODUCTION_BASE: &str = "https://api.mch.weixin.qq.com";
const AUTH_SCHEMA: &str = "WECHATPAY2-SHA256-RSA2048";

/// Provider trade states that count as paid.
pub fn is_paid_state(state: &str) -> bool {
    state == "SUCCESS"
}

/// Build the canonical message for an outbound request.
pub fn request_message(
    method: &str,
    path: &str,
    timestamp: i64,
    nonce: &str,
    body: &str,
) -> String {
    format!("{method}\n{path}\n{timestamp}\n{nonce}\n{body}\n")
}

/// Build the canonical message for an inbound callback.
pub fn callback_message(timestamp: &str, nonce: &str, body: &str) -> String {
    format!("{timestamp}\n{nonce}\n{body}\n")
}

/// Signature headers received on a callback.
#[derive(Debug, Clone)]
pub struct CallbackHeaders {
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
    pub serial: String,
}

/// Encrypted resource node inside a callback body.
#[derive(Debug, Deserialize)]
pub struct EncryptedResource {
    pub nonce: String,
    pub associated_data: String,
    pub ciphertext: String,
}

/// Decrypted payment-result resource.
#[derive(Debug, Deserialize)]
pub struct PaymentResult {
    pub out_trade_no: String,
    pub trade_state: String,
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
    resource: EncryptedResource,
}

#[derive(Debug, Deserialize)]
struct CertificateEntry {
    serial_no: String,
    encrypt_certificate: EncryptedResource,
}

#[derive(Debug, Deserialize)]
struct CertificateList {
    data: Vec<CertificateEntry>,
}

/// WeChat Pay v3 client.
///
/// Holds the normalized merchant private key and a shared platform
/// certificate cache; construction fails fast if any credential is
/// missing or malformed.
pub struct WechatPayClient {
    app_id: String,
    mch_id: String,
    serial_no: String,
    private_key: RsaPrivateKey,
    api_v3_key: Vec<u8>,
    notify_url: String,
    base_url: String,
    http: reqwest::Client,
    certs: Arc<CertificateCache>,
}

impl WechatPayClient {
    /// Build a client from configuration.
    pub fn from_config(
        config: &Config,
        certs: Arc<CertificateCache>,
    ) -> Result<Self, ConfigError> {
        let private_key =
            signing::load_private_key(Config::require(&config.wechat_private_key, "WECHAT_PRIVATE_KEY")?)?;

        let api_v3_key = Config::require(&config.wechat_api_v3_key, "WECHAT_API_V3_KEY")?
            .as_bytes()
            .to_vec();
        if api_v3_key.len() != 32 {
            return Err(ConfigError::InvalidSharedSecret("must be 32 bytes"));
        }

        Ok(Self {
            app_id: Config::require(&config.wechat_app_id, "WECHAT_APP_ID")?.to_string(),
            mch_id: Config::require(&config.wechat_mch_id, "WECHAT_MCH_ID")?.to_string(),
            serial_no: Config::require(&config.wechat_serial_no, "WECHAT_SERIAL_NO")?.to_string(),
            private_key,
            api_v3_key,
            notify_url: Config::require(&config.wechat_notify_url, "WECHAT_NOTIFY_URL")?
                .to_string(),
            base_url: PRODUCTION_BASE.to_string(),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            certs,
        })
    }

    /// Build the Authorization header value for a request.
    pub fn authorization(&self, method: &str, path: &str, body: &str) -> String {
        let timestamp = chrono::Utc::now().timestamp();
        let nonce = new_nonce();
        self.authorization_at(method, path, body, timestamp, &nonce)
    }

    fn authorization_at(
        &self,
        method: &str,
        path: &str,
        body: &str,
        timestamp: i64,
        nonce: &str,
    ) -> String {
        let message = request_message(method, path, timestamp, nonce, body);
        let signature = signing::sign(&self.private_key, message.as_bytes());
        format!(
            "{AUTH_SCHEMA} mchid=\"{}\",nonce_str=\"{}\",signature=\"{}\",timestamp=\"{}\",serial_no=\"{}\"",
            self.mch_id, nonce, signature, timestamp, self.serial_no
        )
    }

    /// Create an order and return the handle matching the scene.
    ///
    /// - `Qr`: native flow, returns the QR `code_url`
    /// - `Redirect`: h5 flow, returns the hosted `h5_url`
    /// - `InApp`: app flow, returns signed in-app prepay parameters
    pub async fn create_order(
        &self,
        scene: PayScene,
        out_trade_no: &str,
        amount_fen: i64,
        description: &str,
    ) -> Result<PaymentHandle, AppError> {
        let (path, extra) = match scene {
            PayScene::Qr => ("/v3/pay/transactions/native", json!({})),
            PayScene::Redirect => (
                "/v3/pay/transactions/h5",
                json!({"scene_info": {"payer_client_ip": "0.0.0.0", "h5_info": {"type": "Wap"}}}),
            ),
            PayScene::InApp => ("/v3/pay/transactions/app", json!({})),
        };

        let mut body = json!({
            "appid": self.app_id,
            "mchid": self.mch_id,
            "out_trade_no": out_trade_no,
            "description": description,
            "notify_url": self.notify_url,
            "amount": {"total": amount_fen, "currency": "CNY"},
        });
        if let (Some(obj), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }

        let response = self.post(path, &body.to_string()).await?;

        match scene {
            PayScene::Qr => Ok(PaymentHandle {
                payment_url: None,
                qr_code: Some(field(&response, "code_url")?),
                wallet_pay: None,
            }),
            PayScene::Redirect => Ok(PaymentHandle {
                payment_url: Some(field(&response, "h5_url")?),
                qr_code: None,
                wallet_pay: None,
            }),
            PayScene::InApp => {
                let prepay_id = field(&response, "prepay_id")?;
                Ok(PaymentHandle {
                    payment_url: None,
                    qr_code: None,
                    wallet_pay: Some(self.app_pay_params(&prepay_id)),
                })
            }
        }
    }

    /// Signed parameters the embedded wallet client hands to the SDK.
    fn app_pay_params(&self, prepay_id: &str) -> serde_json::Value {
        let timestamp = chrono::Utc::now().timestamp();
        let nonce = new_nonce();
        let message = format!("{}\n{}\n{}\n{}\n", self.app_id, timestamp, nonce, prepay_id);
        let pay_sign = signing::sign(&self.private_key, message.as_bytes());
        json!({
            "appid": self.app_id,
            "partnerid": self.mch_id,
            "prepayid": prepay_id,
            "package": "Sign=WXPay",
            "noncestr": nonce,
            "timestamp": timestamp.to_string(),
            "sign": pay_sign,
        })
    }

    /// Query an order's remote trade state by our order id.
    pub async fn query_order(&self, out_trade_no: &str) -> Result<String, AppError> {
        let path = format!(
            "/v3/pay/transactions/out-trade-no/{}?mchid={}",
            out_trade_no, self.mch_id
        );
        let response = self.get(&path).await?;
        field(&response, "trade_state")
    }

    /// Verify a callback's signature, refreshing the certificate cache
    /// once if the cached certificate is stale, unknown, or fails.
    pub async fn verify_callback(
        &self,
        headers: &CallbackHeaders,
        body: &str,
    ) -> Result<(), AppError> {
        let message = callback_message(&headers.timestamp, &headers.nonce, body);

        if let CacheLookup::Fresh(key) = self.certs.lookup(&headers.serial) {
            if signing::verify(&key, message.as_bytes(), &headers.signature) {
                return Ok(());
            }
            // Fall through: the provider may have rotated mid-TTL.
        }

        self.refresh_certificates().await?;

        match self.certs.lookup(&headers.serial) {
            CacheLookup::Fresh(key)
                if signing::verify(&key, message.as_bytes(), &headers.signature) =>
            {
                Ok(())
            }
            CacheLookup::Fresh(_) => Err(AppError::Gateway(
                "callback signature verification failed".to_string(),
            )),
            _ => Err(AppError::Gateway(format!(
                "unknown platform certificate serial {}",
                headers.serial
            ))),
        }
    }

    /// Decrypt a callback's encrypted resource into a payment result.
    pub fn decrypt_resource(&self, resource: &EncryptedResource) -> Result<PaymentResult, AppError> {
        let plaintext = crypto::decrypt_callback_resource(
            &self.api_v3_key,
            &resource.nonce,
            &resource.associated_data,
            &resource.ciphertext,
        )?;
        serde_json::from_slice(&plaintext)
            .map_err(|_| AppError::Gateway("callback resource is not valid JSON".to_string()))
    }

    /// Parse a callback body's resource node.
    pub fn parse_callback_body(body: &str) -> Result<EncryptedResource, AppError> {
        let parsed: CallbackBody = serde_json::from_str(body)
            .map_err(|_| AppError::Gateway("callback body is not valid JSON".to_string()))?;
        Ok(parsed.resource)
    }

    /// Download and decrypt the current platform certificate set.
    async fn refresh_certificates(&self) -> Result<(), AppError> {
        let response = self.get("/v3/certificates").await?;
        let list: CertificateList = serde_json::from_value(response)
            .map_err(|_| AppError::Gateway("certificate list has unexpected shape".to_string()))?;

        let mut certs = Vec::with_capacity(list.data.len());
        for entry in list.data {
            let pem = crypto::decrypt_callback_resource(
                &self.api_v3_key,
                &entry.encrypt_certificate.nonce,
                &entry.encrypt_certificate.associated_data,
                &entry.encrypt_certificate.ciphertext,
            )?;
            let pem = String::from_utf8(pem)
                .map_err(|_| AppError::Gateway("certificate is not UTF-8".to_string()))?;
            let key = signing::load_public_key(&pem)?;
            certs.push((entry.serial_no, key));
        }

        self.certs.replace(certs);
        Ok(())
    }

    async fn post(&self, path: &str, body: &str) -> Result<serde_json::Value, AppError> {
        let authorization = self.authorization("POST", path, body);
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", authorization)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("provider unreachable: {e}")))?;
        read_json(response).await
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value, AppError> {
        let authorization = self.authorization("GET", path, "");
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", authorization)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("provider unreachable: {e}")))?;
        read_json(response).await
    }

    /// Platform certificate cache, exposed for verification helpers.
    pub fn certificates(&self) -> &CertificateCache {
        &self.certs
    }
}

async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, AppError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| AppError::Gateway(format!("provider response unreadable: {e}")))?;

    if !status.is_success() {
        return Err(AppError::Gateway(format!(
            "provider returned {status}: {text}"
        )));
    }

    serde_json::from_str(&text)
        .map_err(|_| AppError::Gateway("provider response is not valid JSON".to_string()))
}

fn field(value: &serde_json::Value, name: &str) -> Result<String, AppError> {
    value
        .get(name)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| AppError::Gateway(format!("provider response missing {name}")))
}

fn new_nonce() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::signing::test_keys::*;

    fn client() -> WechatPayClient {
        let config = Config {
            database_url: String::new(),
            server_port: 0,
            coins_per_yuan: 10,
            wechat_app_id: Some("wxapp".to_string()),
            wechat_mch_id: Some("1900000001".to_string()),
            wechat_serial_no: Some("MCHSERIAL".to_string()),
            wechat_private_key: Some(PRIVATE_PKCS8_PEM.to_string()),
            wechat_api_v3_key: Some("0123456789abcdef0123456789abcdef".to_string()),
            wechat_notify_url: Some("https://example.com/api/v1/notify/wechat".to_string()),
            alipay_app_id: None,
            alipay_private_key: None,
            alipay_public_key: None,
            alipay_notify_url: None,
        };
        WechatPayClient::from_config(&config, Arc::new(CertificateCache::new())).unwrap()
    }

    #[test]
    fn canonical_request_message_shape() {
        let message = request_message("GET", "/v3/certificates", 1700000000, "abc", "");
        assert_eq!(message, "GET\n/v3/certificates\n1700000000\nabc\n\n");
    }

    #[test]
    fn authorization_header_carries_all_fields() {
        let client = client();
        let header = client.authorization_at("POST", "/v3/pay/transactions/native", "{}", 1700000000, "nonce1");
        assert!(header.starts_with("WECHATPAY2-SHA256-RSA2048 "));
        assert!(header.contains("mchid=\"1900000001\""));
        assert!(header.contains("nonce_str=\"nonce1\""));
        assert!(header.contains("timestamp=\"1700000000\""));
        assert!(header.contains("serial_no=\"MCHSERIAL\""));
        assert!(header.contains("signature=\""));
    }

    #[test]
    fn authorization_signature_verifies_against_public_key() {
        let client = client();
        let header =
            client.authorization_at("GET", "/v3/certificates", "", 1700000000, "nonce1");
        let signature = header
            .split("signature=\"")
            .nth(1)
            .unwrap()
            .split('"')
            .next()
            .unwrap();

        let public = signing::load_public_key(PUBLIC_PEM).unwrap();
        let message = request_message("GET", "/v3/certificates", 1700000000, "nonce1", "");
        assert!(signing::verify(&public, message.as_bytes(), signature));
    }

    #[test]
    fn missing_credential_names_the_setting() {
        let config = Config {
            database_url: String::new(),
            server_port: 0,
            coins_per_yuan: 10,
            wechat_app_id: None,
            wechat_mch_id: None,
            wechat_serial_no: None,
            wechat_private_key: Some(PRIVATE_PKCS8_PEM.to_string()),
            wechat_api_v3_key: Some("0123456789abcdef0123456789abcdef".to_string()),
            wechat_notify_url: None,
            alipay_app_id: None,
            alipay_private_key: None,
            alipay_public_key: None,
            alipay_notify_url: None,
        };
        let err =
            WechatPayClient::from_config(&config, Arc::new(CertificateCache::new()))
                .err()
                .unwrap();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn short_api_v3_key_is_rejected_at_construction() {
        let config = Config {
            database_url: String::new(),
            server_port: 0,
            coins_per_yuan: 10,
            wechat_app_id: Some("wxapp".to_string()),
            wechat_mch_id: Some("1900000001".to_string()),
            wechat_serial_no: Some("MCHSERIAL".to_string()),
            wechat_private_key: Some(PRIVATE_PKCS8_PEM.to_string()),
            wechat_api_v3_key: Some("short".to_string()),
            wechat_notify_url: Some("https://example.com/notify".to_string()),
            alipay_app_id: None,
            alipay_private_key: None,
            alipay_public_key: None,
            alipay_notify_url: None,
        };
        let err =
            WechatPayClient::from_config(&config, Arc::new(CertificateCache::new()))
                .err()
                .unwrap();
        assert!(matches!(err, ConfigError::InvalidSharedSecret(_)));
    }

    #[test]
    fn paid_state_mapping() {
        assert!(is_paid_state("SUCCESS"));
        assert!(!is_paid_state("NOTPAY"));
        assert!(!is_paid_state("USERPAYING"));
        assert!(!is_paid_state("CLOSED"));
    }

    #[test]
    fn callback_round_trip_verifies_and_decrypts() {
        use aes_gcm::aead::{Aead, Payload};
        use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
        use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

        let client = client();
        let private = signing::load_private_key(PRIVATE_PKCS8_PEM).unwrap();

        // Encrypt a payment result the way the provider does.
        let plaintext = br#"{"out_trade_no":"R20250601","trade_state":"SUCCESS"}"#;
        let cipher = Aes256Gcm::new_from_slice(b"0123456789abcdef0123456789abcdef").unwrap();
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(b"abcdef012345"),
                Payload {
                    msg: plaintext,
                    aad: b"transaction",
                },
            )
            .unwrap();

        let body = serde_json::json!({
            "resource": {
                "nonce": "abcdef012345",
                "associated_data": "transaction",
                "ciphertext": BASE64.encode(&ciphertext),
            }
        })
        .to_string();

        // Sign the callback the way the provider does and preload the
        // platform certificate.
        let message = callback_message("1700000000", "cbnonce", &body);
        let signature = signing::sign(&private, message.as_bytes());
        client.certificates().replace(vec![(
            "PLATSERIAL".to_string(),
            signing::load_public_key(PUBLIC_PEM).unwrap(),
        )]);

        let headers = CallbackHeaders {
            timestamp: "1700000000".to_string(),
            nonce: "cbnonce".to_string(),
            signature,
            serial: "PLATSERIAL".to_string(),
        };

        // Verification must pass against the cached certificate without
        // any network refresh.
        block_on_verify(&client, &headers, &body);

        let resource = WechatPayClient::parse_callback_body(&body).unwrap();
        let result = client.decrypt_resource(&resource).unwrap();
        assert_eq!(result.out_trade_no, "R20250601");
        assert!(is_paid_state(&result.trade_state));
    }

    fn block_on_verify(client: &WechatPayClient, headers: &CallbackHeaders, body: &str) {
        let outcome = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(client.verify_callback(headers, body));
        assert!(outcome.is_ok());
    }
}
