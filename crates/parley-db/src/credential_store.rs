use async_trait::async_trait;
use chrono::Utc;
use parley_common::{Credential, CredentialId, Error, OwnerId, Result};
use rusqlite::params;
use tracing::warn;

use crate::sqlite::{SqliteStore, parse_timestamp};
use crate::traits::CredentialStore;

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn list_for_owner(&self, owner_id: &OwnerId) -> Result<Vec<Credential>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, owner_id, service, secret, created_at
                     FROM credentials
                     WHERE owner_id = ?1
                     ORDER BY rowid ASC",
                )
                .map_err(|e| Error::Database(format!("failed to prepare credential query: {e}")))?;

            let rows = stmt
                .query_map(params![owner_id.as_str()], |row| {
                    let created_raw: String = row.get(4)?;
                    Ok(Credential {
                        id: CredentialId::from(row.get::<_, String>(0)?),
                        owner_id: OwnerId::from(row.get::<_, String>(1)?),
                        service: row.get(2)?,
                        secret: row.get(3)?,
                        created_at: parse_timestamp(&created_raw),
                    })
                })
                .map_err(|e| Error::Database(format!("failed to list credentials: {e}")))?;

            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::Database(format!("failed to read credential row: {e}")))
        })
    }

    async fn decrypt(&self, credential: &Credential) -> Result<String> {
        self.cipher().open(&credential.secret).map_err(|e| {
            warn!(credential_id = %credential.id, "failed to open credential secret: {e}");
            Error::Security(format!("credential {} could not be decrypted", credential.id))
        })
    }

    async fn add_credential(
        &self,
        owner_id: &OwnerId,
        service: &str,
        secret: &str,
    ) -> Result<Credential> {
        let sealed = self
            .cipher()
            .seal(secret)
            .map_err(|e| Error::Security(format!("failed to seal credential: {e}")))?;

        let credential = Credential {
            id: CredentialId::new(),
            owner_id: owner_id.clone(),
            service: service.to_string(),
            secret: sealed,
            created_at: Utc::now(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO credentials (id, owner_id, service, secret, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    credential.id.as_str(),
                    credential.owner_id.as_str(),
                    credential.service,
                    credential.secret,
                    credential.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| Error::Database(format!("failed to add credential: {e}")))?;
            Ok(())
        })?;

        Ok(credential)
    }
}
