use reqwest::StatusCode;
use serde_json::Value;

use super::ProviderKind;

const MAX_DETAIL_CHARS: usize = 200;

/// Typed outcome of a failed provider call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} rejected the API key")]
    InvalidCredential { provider: ProviderKind },

    #[error("{provider} rate limit exceeded")]
    RateLimited { provider: ProviderKind },

    #[error("model '{model}' is not available on {provider}")]
    ModelUnavailable { provider: ProviderKind, model: String },

    #[error("upstream error: {0}")]
    UpstreamUnknown(String),
}

impl ProviderError {
    pub(crate) fn request_failed(provider: ProviderKind, err: impl std::fmt::Display) -> Self {
        Self::UpstreamUnknown(format!("{provider} request failed: {err}"))
    }
}

/// Error fields shared by both providers' error bodies.
struct ErrorBody {
    kind: String,
    code: String,
    message: String,
}

fn parse_error_body(body: &str) -> ErrorBody {
    let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let error = &value["error"];
    let field = |name: &str| error[name].as_str().unwrap_or_default().to_string();
    let message = match error["message"].as_str() {
        Some(message) => message.to_string(),
        None => body.trim().to_string(),
    };
    ErrorBody {
        kind: field("type"),
        code: field("code"),
        message,
    }
}

fn mentions_missing_model(message: &str) -> bool {
    let message = message.to_lowercase();
    if message.starts_with("model:") {
        return true;
    }
    message.contains("model")
        && ["not found", "does not exist", "not available", "invalid model", "unknown model"]
            .iter()
            .any(|needle| message.contains(needle))
}

fn unknown(provider: ProviderKind, status: Option<StatusCode>, message: &str) -> ProviderError {
    let detail: String = message.chars().take(MAX_DETAIL_CHARS).collect();
    match status {
        Some(status) => ProviderError::UpstreamUnknown(format!("{provider} API error ({status}): {detail}")),
        None => ProviderError::UpstreamUnknown(format!("{provider} stream error: {detail}")),
    }
}

/// Classify an OpenAI error response (or an `{"error": ...}` stream frame
/// when `status` is `None`).
pub(crate) fn classify_openai(status: Option<StatusCode>, body: &str, model: &str) -> ProviderError {
    let provider = ProviderKind::OpenAi;
    let err = parse_error_body(body);

    if status == Some(StatusCode::UNAUTHORIZED)
        || err.code == "invalid_api_key"
        || err.kind == "authentication_error"
    {
        return ProviderError::InvalidCredential { provider };
    }

    if status == Some(StatusCode::TOO_MANY_REQUESTS)
        || matches!(err.code.as_str(), "rate_limit_exceeded" | "insufficient_quota")
        || matches!(err.kind.as_str(), "rate_limit_exceeded" | "insufficient_quota" | "tokens")
    {
        return ProviderError::RateLimited { provider };
    }

    if err.code == "model_not_found"
        || (status == Some(StatusCode::NOT_FOUND) && err.message.to_lowercase().contains("model"))
        || mentions_missing_model(&err.message)
    {
        return ProviderError::ModelUnavailable {
            provider,
            model: model.to_string(),
        };
    }

    unknown(provider, status, &err.message)
}

/// Classify an Anthropic error response (or an `error` stream event when
/// `status` is `None`).
pub(crate) fn classify_anthropic(
    status: Option<StatusCode>,
    body: &str,
    model: &str,
) -> ProviderError {
    let provider = ProviderKind::Anthropic;
    let err = parse_error_body(body);

    if status == Some(StatusCode::UNAUTHORIZED)
        || status == Some(StatusCode::FORBIDDEN)
        || matches!(err.kind.as_str(), "authentication_error" | "permission_error")
    {
        return ProviderError::InvalidCredential { provider };
    }

    if status == Some(StatusCode::TOO_MANY_REQUESTS) || err.kind == "rate_limit_error" {
        return ProviderError::RateLimited { provider };
    }

    if status == Some(StatusCode::NOT_FOUND)
        || err.kind == "not_found_error"
        || (err.kind == "invalid_request_error" && mentions_missing_model(&err.message))
    {
        return ProviderError::ModelUnavailable {
            provider,
            model: model.to_string(),
        };
    }

    unknown(provider, status, &err.message)
}
