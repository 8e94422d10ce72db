use std::sync::Arc;

use parley_agents::{CredentialResolver, ProviderRegistry};
use parley_config::AppConfig;
use parley_db::{AgentStore, ConversationStore, CredentialStore};

use crate::auth::AuthContext;
use crate::lifecycle::LifecycleObserver;

/// Collaborators shared by every request handler.
///
/// Nothing here is mutated per request; all conversation state lives in the
/// stores.
pub struct AppState {
    pub config: AppConfig,
    pub agents: Arc<dyn AgentStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub auth: Arc<dyn AuthContext>,
    pub providers: ProviderRegistry,
    pub resolver: CredentialResolver,
    pub lifecycle_observer: Option<Arc<dyn LifecycleObserver>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        config: AppConfig,
        agents: Arc<dyn AgentStore>,
        credentials: Arc<dyn CredentialStore>,
        conversations: Arc<dyn ConversationStore>,
        auth: Arc<dyn AuthContext>,
        providers: ProviderRegistry,
    ) -> Self {
        let resolver = CredentialResolver::new(config.credentials.allow_fallback);
        Self {
            config,
            agents,
            credentials,
            conversations,
            auth,
            providers,
            resolver,
            lifecycle_observer: None,
        }
    }

    /// Report every chat state transition to `observer`.
    pub fn with_lifecycle_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.lifecycle_observer = Some(observer);
        self
    }
}
