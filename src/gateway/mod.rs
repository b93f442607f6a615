//! Payment gateway protocol layer.
//!
//! Protocol-level clients for the two external payment providers. Each
//! provider requires outbound request signing and inbound callback
//! verification:
//!
//! - `signing`: RSA key normalization, canonical-message signing and
//!   verification shared by both providers
//! - `crypto`: authenticated symmetric decryption of sensitive callback
//!   payloads
//! - `cert_cache`: time-boxed cache of the provider's rotating platform
//!   certificates
//! - `wechat`: WeChat Pay v3 client (header-signed JSON API)
//! - `alipay`: Alipay client (sorted-parameter RSA2 signing)
//!
//! Nothing in here touches the database; the recharge service owns the
//! order lifecycle and calls into these clients at its edges.

pub mod alipay;
pub mod cert_cache;
pub mod crypto;
pub mod signing;
pub mod wechat;
