pub mod agent_store;
pub mod conversation_store;
pub mod credential_store;
pub mod sqlite;
pub mod token_store;
pub mod traits;

pub use conversation_store::conversation_title;
pub use sqlite::SqliteStore;
pub use traits::{AgentStore, ConversationStore, CredentialStore, TokenStore};
