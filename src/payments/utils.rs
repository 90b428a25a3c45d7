use crate::payments::error::{GatewayResult, PaymentError};
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Upper bound on how much of a remote error body is kept in errors and logs.
pub const BODY_PREVIEW_LIMIT: usize = 400;

pub fn build_http_client(timeout: Duration) -> GatewayResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PaymentError::Configuration {
            message: format!("failed to initialize HTTP client: {}", e),
        })
}

pub fn hmac_sha256_hex(secret: &[u8], payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Accepts a bare hex digest or one prefixed with `sha256=`.
pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Some(computed) = hmac_sha256_hex(secret.as_bytes(), payload) else {
        return false;
    };
    secure_eq(
        computed.as_bytes(),
        signature.to_ascii_lowercase().as_bytes(),
    )
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Truncates to at most `limit` characters without splitting a code point.
pub fn truncate_preview(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
