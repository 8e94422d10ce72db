use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use parley_agents::{ProviderError, ProviderKind};
use parley_common::ConversationId;
use tracing::error;

use crate::chat::CONVERSATION_ID_HEADER;

/// Everything that can end a chat request before streaming begins.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("unauthenticated request")]
    Unauthorized,

    #[error("message is missing or empty")]
    MessageRequired,

    #[error("agent not found")]
    AgentNotFound,

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("model '{model}' does not belong to a supported provider")]
    UnsupportedModel { model: String },

    #[error("owner has no credentials")]
    NoCredentials,

    #[error("no credential matches provider {provider}")]
    NoMatchingCredential { provider: ProviderKind },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<parley_common::Error> for ChatError {
    fn from(err: parley_common::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::MessageRequired
            | Self::UnsupportedModel { .. }
            | Self::NoCredentials
            | Self::NoMatchingCredential { .. } => StatusCode::BAD_REQUEST,
            Self::AgentNotFound | Self::ConversationNotFound => StatusCode::NOT_FOUND,
            Self::Provider(ProviderError::InvalidCredential { .. }) => StatusCode::UNAUTHORIZED,
            Self::Provider(ProviderError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
            Self::Provider(ProviderError::ModelUnavailable { .. }) => StatusCode::BAD_REQUEST,
            Self::Provider(ProviderError::UpstreamUnknown(_)) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message shown to the caller. Upstream and internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Unauthorized => "Unauthorized".to_string(),
            Self::MessageRequired => "Message is required".to_string(),
            Self::AgentNotFound => "Agent not found".to_string(),
            Self::ConversationNotFound => "Conversation not found".to_string(),
            Self::UnsupportedModel { model } => format!(
                "The selected model is not available: {model}. Use an OpenAI (gpt-*, o1, o3, o4) or Anthropic (claude-*) model."
            ),
            Self::NoCredentials => "No API connections found for this agent".to_string(),
            Self::NoMatchingCredential { provider } => format!(
                "No API connection matches provider {}. Add a {} API connection.",
                provider.as_str(),
                provider.display_name()
            ),
            Self::Provider(ProviderError::InvalidCredential { provider }) => format!(
                "Invalid API key. Please check your {} API connection settings.",
                provider.display_name()
            ),
            Self::Provider(ProviderError::RateLimited { .. }) => {
                "Rate limit exceeded. Please try again later.".to_string()
            }
            Self::Provider(ProviderError::ModelUnavailable { provider, model }) => format!(
                "The selected model is not available: {model}. {}",
                provider.model_hint()
            ),
            Self::Provider(ProviderError::UpstreamUnknown(_)) | Self::Internal(_) => {
                "Something went wrong while generating a response. Please try again.".to_string()
            }
        }
    }

    /// Attach the conversation id so a caller can retry into the same thread.
    pub fn with_conversation(self, conversation_id: &ConversationId) -> ChatErrorResponse {
        ChatErrorResponse {
            error: self,
            conversation_id: Some(conversation_id.clone()),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        ChatErrorResponse {
            error: self,
            conversation_id: None,
        }
        .into_response()
    }
}

/// A [`ChatError`] plus the conversation it happened in, if one exists yet.
#[derive(Debug)]
pub struct ChatErrorResponse {
    pub error: ChatError,
    pub conversation_id: Option<ConversationId>,
}

impl From<ChatError> for ChatErrorResponse {
    fn from(error: ChatError) -> Self {
        Self {
            error,
            conversation_id: None,
        }
    }
}

impl IntoResponse for ChatErrorResponse {
    fn into_response(self) -> Response {
        let status = self.error.status();
        if status.is_server_error() {
            error!(error = %self.error, "chat request failed");
        }

        let body = serde_json::json!({ "error": self.error.public_message() });
        let mut response = (status, Json(body)).into_response();
        if let Some(id) = self.conversation_id
            && let Ok(value) = HeaderValue::from_str(id.as_str())
        {
            response.headers_mut().insert(CONVERSATION_ID_HEADER, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(err: ChatError, status: StatusCode, fragment: &str) {
        assert_eq!(err.status(), status, "{err:?}");
        let message = err.public_message();
        assert!(message.contains(fragment), "{message:?} should contain {fragment:?}");
    }

    #[test]
    fn error_table() {
        check(ChatError::Unauthorized, StatusCode::UNAUTHORIZED, "Unauthorized");
        check(ChatError::MessageRequired, StatusCode::BAD_REQUEST, "Message is required");
        check(ChatError::AgentNotFound, StatusCode::NOT_FOUND, "Agent not found");
        check(
            ChatError::ConversationNotFound,
            StatusCode::NOT_FOUND,
            "Conversation not found",
        );
        check(
            ChatError::UnsupportedModel {
                model: "llama3".into(),
            },
            StatusCode::BAD_REQUEST,
            "model is not available: llama3",
        );
        check(
            ChatError::NoCredentials,
            StatusCode::BAD_REQUEST,
            "No API connections found for this agent",
        );
        check(
            ChatError::NoMatchingCredential {
                provider: ProviderKind::Anthropic,
            },
            StatusCode::BAD_REQUEST,
            "anthropic",
        );
        check(
            ProviderError::InvalidCredential {
                provider: ProviderKind::Anthropic,
            }
            .into(),
            StatusCode::UNAUTHORIZED,
            "Invalid API key. Please check your Anthropic",
        );
        check(
            ProviderError::RateLimited {
                provider: ProviderKind::OpenAi,
            }
            .into(),
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded",
        );
        check(
            ProviderError::ModelUnavailable {
                provider: ProviderKind::OpenAi,
                model: "gpt-9".into(),
            }
            .into(),
            StatusCode::BAD_REQUEST,
            "model is not available: gpt-9",
        );
        check(
            ProviderError::UpstreamUnknown("boom".into()).into(),
            StatusCode::INTERNAL_SERVER_ERROR,
            "Please try again",
        );
        check(
            parley_common::Error::Database("disk full".into()).into(),
            StatusCode::INTERNAL_SERVER_ERROR,
            "Please try again",
        );
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err: ChatError = ProviderError::UpstreamUnknown("OpenAI API error (500): secret".into()).into();
        assert!(!err.public_message().contains("secret"));
    }

    #[test]
    fn conversation_header_is_attached() {
        let id = ConversationId::from("c-42");
        let response = ChatError::Provider(ProviderError::RateLimited {
            provider: ProviderKind::OpenAi,
        })
        .with_conversation(&id)
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[CONVERSATION_ID_HEADER], "c-42");
    }
}
