pub mod redaction;
pub mod secrets;
pub mod tokens;

pub use redaction::{RedactingWriter, redact_secrets};
pub use secrets::{SecretCipher, SecretError};
pub use tokens::{generate_token, hash_token};
