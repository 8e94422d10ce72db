use async_trait::async_trait;
use parley_common::{Error, OwnerId, Result};
use parley_security::{generate_token, hash_token};
use rusqlite::{OptionalExtension, params};

use crate::sqlite::SqliteStore;
use crate::traits::TokenStore;

#[async_trait]
impl TokenStore for SqliteStore {
    async fn issue_token(&self, owner_id: &OwnerId) -> Result<String> {
        let token =
            generate_token().map_err(|e| Error::Security(format!("failed to issue token: {e}")))?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO api_tokens (token_hash, owner_id) VALUES (?1, ?2)",
                params![hash_token(&token), owner_id.as_str()],
            )
            .map_err(|e| Error::Database(format!("failed to store token: {e}")))?;
            Ok(())
        })?;

        Ok(token)
    }

    async fn owner_for_token(&self, token: &str) -> Result<Option<OwnerId>> {
        let token_hash = hash_token(token);
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT owner_id FROM api_tokens WHERE token_hash = ?1",
                params![token_hash],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map(|owner| owner.map(OwnerId::from))
            .map_err(|e| Error::Database(format!("failed to look up token: {e}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_security::SecretCipher;

    #[tokio::test]
    async fn issued_token_resolves_to_owner() {
        let store = SqliteStore::in_memory(SecretCipher::from_key([2u8; 32])).unwrap();
        let token = store.issue_token(&OwnerId::from("u1")).await.unwrap();

        let owner = store.owner_for_token(&token).await.unwrap();
        assert_eq!(owner, Some(OwnerId::from("u1")));

        let unknown = store.owner_for_token("pk_not-issued").await.unwrap();
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn plaintext_token_is_not_stored() {
        let store = SqliteStore::in_memory(SecretCipher::from_key([2u8; 32])).unwrap();
        let token = store.issue_token(&OwnerId::from("u1")).await.unwrap();

        let stored: String = store
            .with_conn(|conn| {
                conn.query_row("SELECT token_hash FROM api_tokens", [], |row| row.get(0))
                    .map_err(|e| Error::Database(e.to_string()))
            })
            .unwrap();
        assert_ne!(stored, token);
        assert_eq!(stored, hash_token(&token));
    }
}
