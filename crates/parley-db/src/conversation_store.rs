use async_trait::async_trait;
use chrono::Utc;
use parley_common::{
    AgentId, Conversation, ConversationId, Error, Message, MessageId, OwnerId, Result, Role,
};
use rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::sqlite::{SqliteStore, parse_timestamp};
use crate::traits::ConversationStore;

const TITLE_MAX_CHARS: usize = 60;

/// Title for a new conversation derived from its first user message.
pub fn conversation_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        return trimmed.to_string();
    }
    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    title.truncate(title.trim_end().len());
    title.push_str("...");
    title
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create_conversation(
        &self,
        agent_id: &AgentId,
        owner_id: &OwnerId,
        title: &str,
    ) -> Result<Conversation> {
        let conversation = Conversation {
            id: ConversationId::new(),
            agent_id: agent_id.clone(),
            owner_id: owner_id.clone(),
            title: title.to_string(),
            created_at: Utc::now(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, agent_id, owner_id, title, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    conversation.id.as_str(),
                    conversation.agent_id.as_str(),
                    conversation.owner_id.as_str(),
                    conversation.title,
                    conversation.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| Error::Database(format!("failed to create conversation: {e}")))?;
            Ok(())
        })?;

        debug!(conversation_id = %conversation.id, "created conversation");
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, agent_id, owner_id, title, created_at
                 FROM conversations WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    let created_raw: String = row.get(4)?;
                    Ok(Conversation {
                        id: ConversationId::from(row.get::<_, String>(0)?),
                        agent_id: AgentId::from(row.get::<_, String>(1)?),
                        owner_id: OwnerId::from(row.get::<_, String>(2)?),
                        title: row.get(3)?,
                        created_at: parse_timestamp(&created_raw),
                    })
                },
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load conversation: {e}")))
        })
    }

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        if role == Role::System {
            return Err(Error::Database(
                "system messages are injected at read time and never persisted".to_string(),
            ));
        }

        let message = Message::new(conversation_id.clone(), role, content);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id.as_str(),
                    message.conversation_id.as_str(),
                    message.role.as_str(),
                    message.content,
                    message.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| Error::Database(format!("failed to append message: {e}")))?;
            Ok(())
        })?;

        Ok(message)
    }

    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, role, content, created_at
                     FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY rowid ASC",
                )
                .map_err(|e| Error::Database(format!("failed to prepare message query: {e}")))?;

            let rows = stmt
                .query_map(params![conversation_id.as_str()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(|e| Error::Database(format!("failed to load messages: {e}")))?;

            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::Database(format!("failed to read message row: {e}")))
        })?;

        // Role decoding happens outside the row mapper so a bad value surfaces
        // as a data-integrity error rather than a driver error.
        rows.into_iter()
            .map(|(id, role, content, created_raw)| {
                Ok(Message {
                    id: MessageId::from(id),
                    conversation_id: conversation_id.clone(),
                    role: role.parse::<Role>()?,
                    content,
                    created_at: parse_timestamp(&created_raw),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_security::SecretCipher;

    fn store() -> SqliteStore {
        SqliteStore::in_memory(SecretCipher::from_key([4u8; 32])).expect("in-memory store should open")
    }

    #[tokio::test]
    async fn append_and_list_messages_in_creation_order() {
        let store = store();
        let conversation = store
            .create_conversation(&AgentId::from("a1"), &OwnerId::from("u1"), "hi")
            .await
            .unwrap();

        store
            .append_message(&conversation.id, Role::User, "first")
            .await
            .unwrap();
        store
            .append_assistant_message(&conversation.id, "second")
            .await
            .unwrap();
        store
            .append_message(&conversation.id, Role::User, "third")
            .await
            .unwrap();

        let messages = store.list_messages(&conversation.id).await.unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["first", "second", "third"]);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn system_messages_are_never_stored() {
        let store = store();
        let conversation = store
            .create_conversation(&AgentId::from("a1"), &OwnerId::from("u1"), "hi")
            .await
            .unwrap();

        let err = store
            .append_message(&conversation.id, Role::System, "You are helpful.")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert!(store.list_messages(&conversation.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupted_role_surfaces_as_error() {
        let store = store();
        let conversation = store
            .create_conversation(&AgentId::from("a1"), &OwnerId::from("u1"), "hi")
            .await
            .unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO messages (id, conversation_id, role, content, created_at)
                     VALUES ('m1', ?1, 'tool', 'x', '2024-01-01T00:00:00+00:00')",
                    params![conversation.id.as_str()],
                )
                .map_err(|e| Error::Database(e.to_string()))
            })
            .unwrap();

        let err = store.list_messages(&conversation.id).await.unwrap_err();
        assert!(err.to_string().contains("invalid message role 'tool'"));
    }

    #[tokio::test]
    async fn load_or_create_creates_when_no_id_supplied() {
        let store = store();
        let agent = AgentId::from("a1");
        let owner = OwnerId::from("u1");

        let created = store
            .load_or_create(None, &agent, &owner, "  What is Rust?  ")
            .await
            .unwrap()
            .expect("conversation should be created");
        assert_eq!(created.title, "What is Rust?");

        let loaded = store
            .load_or_create(Some(&created.id), &agent, &owner, "ignored")
            .await
            .unwrap();
        assert_eq!(loaded, Some(created));
    }

    #[tokio::test]
    async fn load_or_create_rejects_foreign_or_unknown_ids() {
        let store = store();
        let agent = AgentId::from("a1");
        let owner = OwnerId::from("u1");
        let conversation = store.create_conversation(&agent, &owner, "t").await.unwrap();

        let other_owner = store
            .load_or_create(Some(&conversation.id), &agent, &OwnerId::from("u2"), "x")
            .await
            .unwrap();
        assert!(other_owner.is_none());

        let other_agent = store
            .load_or_create(Some(&conversation.id), &AgentId::from("a2"), &owner, "x")
            .await
            .unwrap();
        assert!(other_agent.is_none());

        let unknown = store
            .load_or_create(Some(&ConversationId::from("missing")), &agent, &owner, "x")
            .await
            .unwrap();
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn append_to_unknown_conversation_fails() {
        let store = store();
        let err = store
            .append_message(&ConversationId::from("missing"), Role::User, "hello")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to append message"));
    }

    #[test]
    fn long_titles_are_truncated() {
        let long = "word ".repeat(30);
        let title = conversation_title(&long);
        assert!(title.ends_with("..."));
        assert!(title.chars().count() <= TITLE_MAX_CHARS + 3);
        assert_eq!(conversation_title("short"), "short");
    }
}
