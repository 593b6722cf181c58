//! Webhook delivery headers and `X-Hub-Signature-256` validation.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const CONTENT_TYPE_HEADER: &str = "content-type";

#[derive(Debug, Error, Eq, PartialEq)]
pub enum SignatureError {
    #[error("no webhook secret configured")]
    MissingSecret,
    #[error("x-hub-signature-256 header missing")]
    MissingSignature,
    #[error("unsupported content type {0:?}")]
    ContentType(String),
    #[error("signature mismatch")]
    Mismatch,
}

/// Lowercases header names. When a name repeats, the first value wins.
pub fn normalize_headers<'a, I>(headers: I) -> HashMap<String, String>
where I: IntoIterator<Item = (&'a str, &'a str)> {
    let mut out = HashMap::new();
    for (name, value) in headers {
        out.entry(name.to_ascii_lowercase()).or_insert_with(|| value.to_string());
    }
    out
}

/// Parses `sha256=<hex>` into raw bytes. `None` for any other shape.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    hex::decode(header.strip_prefix("sha256=")?).ok()
}

pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

/// Constant-time check of a `sha256=` header against the payload.
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(expected) = parse_signature_header(signature_header) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

fn is_json(content_type: &str) -> bool {
    content_type
        .parse::<mime::Mime>()
        .is_ok_and(|m| m.essence_str() == mime::APPLICATION_JSON.essence_str())
}

/// Validates a delivery given lowercased headers.
///
/// Fails closed: without a secret nothing validates.
pub fn validate_delivery(
    body: &[u8],
    headers: &HashMap<String, String>,
    secret: Option<&str>,
) -> Result<(), SignatureError> {
    let secret = secret.filter(|s| !s.is_empty()).ok_or(SignatureError::MissingSecret)?;
    let signature = headers.get(SIGNATURE_HEADER).ok_or(SignatureError::MissingSignature)?;
    let content_type = headers.get(CONTENT_TYPE_HEADER).map(String::as_str).unwrap_or_default();
    if !is_json(content_type) {
        return Err(SignatureError::ContentType(content_type.to_string()));
    }
    if !verify_signature(body, signature, secret.as_bytes()) {
        return Err(SignatureError::Mismatch);
    }
    Ok(())
}
