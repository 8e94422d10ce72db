pub mod agent;
pub mod error;
pub mod message;
pub mod types;

pub use agent::{Agent, Credential, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
pub use error::{Error, Result};
pub use message::{Conversation, Message, Role};
pub use types::{AgentId, ConversationId, CredentialId, MessageId, OwnerId};
