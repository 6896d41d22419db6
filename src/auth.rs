//! Authentication helpers
//!
//! - Public key normalisation
//! - OAuth state tokens
//! - PKCE verifier/challenge pairs (RFC 7636, S256)

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Trimmed public key, or `None` when absent or blank
pub fn normalize_public_key(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|k| !k.is_empty())
}

/// Shortened key for log lines
pub fn short_key(public_key: &str) -> String {
    if public_key.chars().count() > 12 {
        let head: String = public_key.chars().take(8).collect();
        let tail: String = public_key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("{}...{}", head, tail)
    } else {
        public_key.to_string()
    }
}

/// Random, URL-safe state token
pub fn generate_state() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

/// Random PKCE code verifier (43 characters)
pub fn generate_code_verifier() -> String {
    URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>())
}

/// S256 code challenge for a verifier
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Check that a pending state was created within the last `ttl_secs`.
/// States from the future are rejected.
pub fn is_state_fresh(created_at: DateTime<Utc>, ttl_secs: i64) -> bool {
    let now = Utc::now().timestamp();
    let created = created_at.timestamp();
    created <= now && (now - created) < ttl_secs
}
