pub mod completion;
pub mod context;
pub mod providers;
pub mod resolver;

pub use completion::{Completion, CompletionOutcome, CompletionStream, OnComplete};
pub use providers::{
    AnthropicAdapter, ChatMessage, ChatRequest, OpenAiAdapter, ProviderAdapter, ProviderError,
    ProviderKind, ProviderRegistry, TextStream,
};
pub use resolver::{CredentialResolver, MatchStep, Resolution};
