//! Authenticated decryption of sensitive callback payloads.
//!
//! Providers deliver payment-result notifications with the sensitive
//! resource encrypted AES-256-GCM under the merchant's shared API
//! secret, alongside a nonce and associated data. The authentication
//! tag is verified as part of decryption; a payload that fails the tag
//! is never partially trusted.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

use crate::error::{AppError, ConfigError};

/// AES-256-GCM key length in bytes.
const KEY_LEN: usize = 32;

/// GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Decrypt a base64 ciphertext (with appended tag) using the shared
/// secret, nonce, and associated data supplied by the provider.
///
/// # Errors
///
/// - `Configuration(InvalidSharedSecret)`: the merchant secret is not
///   32 bytes (a deployment problem, not a provider problem)
/// - `Gateway`: bad base64, wrong nonce length, or tag failure; the
///   payload cannot be trusted
pub fn decrypt_callback_resource(
    shared_secret: &[u8],
    nonce: &str,
    associated_data: &str,
    ciphertext_b64: &str,
) -> Result<Vec<u8>, AppError> {
    if shared_secret.len() != KEY_LEN {
        return Err(ConfigError::InvalidSharedSecret("must be 32 bytes").into());
    }
    if nonce.len() != NONCE_LEN {
        return Err(AppError::Gateway(
            "callback nonce has invalid length".to_string(),
        ));
    }

    let ciphertext = BASE64
        .decode(ciphertext_b64.as_bytes())
        .map_err(|_| AppError::Gateway("callback ciphertext is not valid base64".to_string()))?;

    let cipher = Aes256Gcm::new_from_slice(shared_secret)
        .map_err(|_| AppError::Configuration(ConfigError::InvalidSharedSecret("must be 32 bytes")))?;

    cipher
        .decrypt(
            Nonce::from_slice(nonce.as_bytes()),
            Payload {
                msg: &ciphertext,
                aad: associated_data.as_bytes(),
            },
        )
        .map_err(|_| AppError::Gateway("callback payload failed authentication".to_string()))
}
