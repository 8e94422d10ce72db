use async_trait::async_trait;
use parley_common::{
    Agent, AgentId, Conversation, ConversationId, Credential, Message, OwnerId, Result, Role,
};

use crate::conversation_store::conversation_title;

/// Read access to agents, scoped by owner.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Fetch an agent only if it is owned by `owner_id`.
    async fn get_agent(&self, agent_id: &AgentId, owner_id: &OwnerId) -> Result<Option<Agent>>;

    async fn create_agent(&self, agent: &Agent) -> Result<()>;

    async fn list_agents(&self, owner_id: &OwnerId) -> Result<Vec<Agent>>;
}

/// Stored upstream API connections.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// All credentials of an owner in creation order.
    async fn list_for_owner(&self, owner_id: &OwnerId) -> Result<Vec<Credential>>;

    /// Open the sealed secret of a credential.
    async fn decrypt(&self, credential: &Credential) -> Result<String>;

    async fn add_credential(
        &self,
        owner_id: &OwnerId,
        service: &str,
        secret: &str,
    ) -> Result<Credential>;
}

/// Durable conversations and their append-only message log.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(
        &self,
        agent_id: &AgentId,
        owner_id: &OwnerId,
        title: &str,
    ) -> Result<Conversation>;

    async fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>>;

    /// Append a message. System messages are never persisted and are rejected.
    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        role: Role,
        content: &str,
    ) -> Result<Message>;

    /// Messages of a conversation, oldest first.
    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>>;

    /// Load `requested` if it belongs to the agent/owner pair, or create a new
    /// conversation titled after `first_message` when no id was supplied.
    ///
    /// Returns `None` when the requested conversation does not exist or belongs
    /// to someone else.
    async fn load_or_create(
        &self,
        requested: Option<&ConversationId>,
        agent_id: &AgentId,
        owner_id: &OwnerId,
        first_message: &str,
    ) -> Result<Option<Conversation>> {
        match requested {
            Some(id) => Ok(self
                .get_conversation(id)
                .await?
                .filter(|c| c.belongs_to(agent_id, owner_id))),
            None => self
                .create_conversation(agent_id, owner_id, &conversation_title(first_message))
                .await
                .map(Some),
        }
    }

    async fn append_assistant_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
    ) -> Result<Message> {
        self.append_message(conversation_id, Role::Assistant, content)
            .await
    }
}

/// Bearer tokens that identify dashboard owners. Only hashes are stored.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Issue a new token for `owner_id`, returning the plaintext once.
    async fn issue_token(&self, owner_id: &OwnerId) -> Result<String>;

    async fn owner_for_token(&self, token: &str) -> Result<Option<OwnerId>>;
}
