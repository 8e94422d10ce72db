use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest::{SHA256, digest};
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt::Write;

use crate::secrets::SecretError;

/// Prefix for bearer tokens issued to dashboard owners.
pub const TOKEN_PREFIX: &str = "pk_";
const TOKEN_BYTES: usize = 32;

/// Generate a new random bearer token. Only its hash should ever be stored.
pub fn generate_token() -> Result<String, SecretError> {
    let mut raw = [0u8; TOKEN_BYTES];
    SystemRandom::new()
        .fill(&mut raw)
        .map_err(|_| SecretError::Crypto("failed to generate token".into()))?;
    Ok(format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(raw)))
}

/// Hex-encoded SHA-256 of a bearer token.
pub fn hash_token(token: &str) -> String {
    let hashed = digest(&SHA256, token.trim().as_bytes());
    hashed
        .as_ref()
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}
