use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;

const KEY_LEN: usize = 32; // 256 bits

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("invalid master key: {0}")]
    InvalidKey(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("invalid sealed secret: {0}")]
    Format(String),

    #[error("secret could not be decrypted (wrong master key or corrupted data)")]
    Decrypt,
}

/// Seals and opens credential secrets with AES-256-GCM.
///
/// Sealed values are `base64(nonce || ciphertext || tag)`, so every value
/// carries its own random nonce and can be stored as a single text column.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; KEY_LEN],
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    pub fn from_key(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Build a cipher from a base64-encoded 32-byte master key.
    pub fn from_base64(encoded: &str) -> Result<Self, SecretError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| SecretError::InvalidKey(format!("not valid base64: {e}")))?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            SecretError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", bytes.len()))
        })?;
        Ok(Self { key })
    }

    /// Generate a new random master key, base64-encoded.
    pub fn generate_key() -> Result<String, SecretError> {
        let mut key = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| SecretError::Crypto("failed to generate key".into()))?;
        Ok(BASE64.encode(key))
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, SecretError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| SecretError::Crypto("failed to generate nonce".into()))?;

        let key = self.aead_key()?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| SecretError::Crypto("encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(BASE64.encode(sealed))
    }

    pub fn open(&self, sealed: &str) -> Result<String, SecretError> {
        let mut bytes = BASE64
            .decode(sealed.trim())
            .map_err(|e| SecretError::Format(format!("invalid encoding: {e}")))?;
        if bytes.len() <= NONCE_LEN {
            return Err(SecretError::Format("sealed value too short".into()));
        }

        let mut ciphertext = bytes.split_off(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(&bytes)
            .map_err(|_| SecretError::Crypto("invalid nonce length".into()))?;

        let key = self.aead_key()?;
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut ciphertext)
            .map_err(|_| SecretError::Decrypt)?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| SecretError::Format("secret is not valid UTF-8".into()))
    }

    fn aead_key(&self) -> Result<LessSafeKey, SecretError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key)
            .map_err(|_| SecretError::Crypto("failed to create AES key".into()))?;
        Ok(LessSafeKey::new(unbound))
    }
}
