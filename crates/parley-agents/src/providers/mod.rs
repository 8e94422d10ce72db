use async_trait::async_trait;
use futures::Stream;
use parley_common::{Agent, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

pub mod anthropic;
pub mod error;
pub mod openai;
pub mod sse;

pub use anthropic::AnthropicAdapter;
pub use error::ProviderError;
pub use openai::OpenAiAdapter;

/// Canonical upstream provider, derived from an agent's model name rather
/// than from how the owner labelled their credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    /// Map a model identifier to its provider by naming convention.
    pub fn from_model(model: &str) -> Option<Self> {
        let model = model.trim().to_ascii_lowercase();
        if model.starts_with("claude") {
            return Some(Self::Anthropic);
        }
        const OPENAI_PREFIXES: [&str; 6] = ["gpt-", "chatgpt-", "ft:gpt-", "o1", "o3", "o4"];
        if OPENAI_PREFIXES.iter().any(|p| model.starts_with(p)) {
            return Some(Self::OpenAi);
        }
        None
    }

    /// Identifier compared against credential labels ("openai", "anthropic").
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
        }
    }

    /// User-facing advice when a model is rejected by this provider.
    pub fn model_hint(&self) -> &'static str {
        match self {
            Self::OpenAi => {
                "Check that your OpenAI account has access to this model, or pick another model for this agent."
            }
            Self::Anthropic => {
                "Check the Claude model name (for example claude-3-5-sonnet-latest) and that your Anthropic plan includes it."
            }
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One entry of the ordered context handed to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Provider-neutral chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn for_agent(agent: &Agent, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: agent.model.clone(),
            messages,
            temperature: agent.effective_temperature(),
            max_tokens: agent.max_tokens,
        }
    }
}

/// Raw text deltas, free of any provider framing.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Translates one upstream wire protocol into a uniform text stream.
///
/// `stream` returns only once the provider has accepted the request, so every
/// error it returns happens before any byte reaches the caller. Errors that
/// occur afterwards arrive as `Err` items on the stream.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> ProviderKind;

    async fn stream(&self, request: &ChatRequest, api_key: &str)
    -> Result<TextStream, ProviderError>;
}

/// Adapters keyed by canonical provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Register an adapter, replacing any previous one for the same provider.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, provider: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }
}
