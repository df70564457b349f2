// Request signing module
//
// HMAC-SHA256 signatures for calls to the DLP file-processing service.

pub mod canonical;

pub use canonical::build_canonical_query;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Value sent in the `X-HMAC-ALGORITHM` header
pub const SIGNATURE_ALGORITHM: &str = "hmac-sha256";

/// Errors raised while signing a request. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("Signing secret key cannot be empty")]
    EmptySecretKey,

    #[error("Signing access key cannot be empty")]
    EmptyAccessKey,

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SigningError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Inputs of one signature computation
pub struct SigningParams<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub canonical_query: &'a str,
    pub access_key: &'a str,
    pub date: &'a str, // RFC 1123, e.g. "Mon, 05 Jan 2026 08:00:00 GMT"
}

fn create_string_to_sign(params: &SigningParams) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n",
        params.method, params.path, params.canonical_query, params.access_key, params.date
    )
}

/// Sign a request and return the base64 signature.
///
/// The string to sign is `method\npath\ncanonical_query\naccess_key\ndate\n`.
/// Identical inputs always produce identical signatures.
///
/// # Errors
///
/// Returns `SigningError::EmptySecretKey` when `secret_key` is empty rather
/// than producing a signature with an empty key.
pub fn sign(
    method: &str,
    path: &str,
    canonical_query: &str,
    access_key: &str,
    date: &str,
    secret_key: &str,
) -> Result<String, SigningError> {
    if secret_key.is_empty() {
        return Err(SigningError::EmptySecretKey);
    }

    let string_to_sign = create_string_to_sign(&SigningParams {
        method,
        path,
        canonical_query,
        access_key,
        date,
    });

    let digest = hmac_sha256(secret_key.as_bytes(), string_to_sign.as_bytes())?;
    Ok(BASE64.encode(digest))
}

/// Format a timestamp for the `Date` header (RFC 1123, always GMT)
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Signer bound to one access/secret key pair.
///
/// Key material is validated once at construction so a misconfigured
/// deployment fails at startup instead of on the first request.
#[derive(Clone)]
pub struct RequestSigner {
    access_key: String,
    secret_key: String,
}

impl RequestSigner {
    pub fn new(access_key: &str, secret_key: &str) -> Result<Self, SigningError> {
        if access_key.is_empty() {
            return Err(SigningError::EmptyAccessKey);
        }
        if secret_key.is_empty() {
            return Err(SigningError::EmptySecretKey);
        }

        Ok(Self {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// Sign `method path?canonical_query` for the given `Date` header value
    pub fn sign(
        &self,
        method: &str,
        path: &str,
        canonical_query: &str,
        date: &str,
    ) -> Result<String, SigningError> {
        sign(
            method,
            path,
            canonical_query,
            &self.access_key,
            date,
            &self.secret_key,
        )
    }
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
