use async_trait::async_trait;
use parley_common::Role;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::error::classify_anthropic;
use super::sse::{Frame, SseEvent, text_stream};
use super::{ChatRequest, ProviderAdapter, ProviderError, ProviderKind, TextStream};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TEMPERATURE: f64 = 1.0;

/// Streams messages from the Anthropic Messages API.
#[derive(Clone)]
pub struct AnthropicAdapter {
    client: Client,
    base_url: String,
    version: String,
}

impl AnthropicAdapter {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string());
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            version: ANTHROPIC_VERSION.to_string(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// System entries move to the top-level `system` field; everything else
    /// keeps its order in `messages`.
    fn convert_request<'a>(&self, request: &'a ChatRequest) -> AnthropicRequest<'a> {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| AnthropicMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        AnthropicRequest {
            model: &request.model,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages,
            temperature: request.temperature.clamp(0.0, MAX_TEMPERATURE),
            max_tokens: request.max_tokens,
            stream: true,
        }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        api_key: &str,
    ) -> Result<TextStream, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.convert_request(request);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.version)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::request_failed(ProviderKind::Anthropic, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            debug!(%status, "anthropic rejected chat request");
            return Err(classify_anthropic(Some(status), &error_text, &request.model));
        }

        let model = request.model.clone();
        Ok(text_stream(response.bytes_stream(), move |event| {
            parse_anthropic_event(event, &model)
        }))
    }
}

fn parse_anthropic_event(event: &SseEvent, model: &str) -> Frame {
    let json: Value = match serde_json::from_str(&event.data) {
        Ok(json) => json,
        Err(e) => {
            debug!(error = %e, "skipping unparseable anthropic stream event");
            return Frame::Skip;
        }
    };

    // The `type` field inside the payload is authoritative; the SSE event
    // name is only a fallback.
    let kind = json["type"]
        .as_str()
        .or(event.event.as_deref())
        .unwrap_or_default();

    match kind {
        "content_block_delta" => {
            let delta = &json["delta"];
            if delta["type"].as_str() == Some("text_delta") {
                Frame::Text(delta["text"].as_str().unwrap_or_default().to_string())
            } else {
                Frame::Skip
            }
        }
        "message_stop" => Frame::Done,
        "error" => Frame::Error(classify_anthropic(None, &event.data, model)),
        _ => Frame::Skip,
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChatMessage;

    fn event(name: &str, data: &str) -> SseEvent {
        SseEvent {
            event: Some(name.to_string()),
            data: data.to_string(),
        }
    }

    #[test]
    fn system_prompt_is_lifted_and_temperature_clamped() {
        let adapter = AnthropicAdapter::new(None);
        let request = ChatRequest {
            model: "claude-3-5-sonnet-latest".into(),
            messages: vec![
                ChatMessage::new(Role::System, "You are terse."),
                ChatMessage::new(Role::User, "hi"),
                ChatMessage::new(Role::Assistant, "hello"),
                ChatMessage::new(Role::User, "again"),
            ],
            temperature: 1.6,
            max_tokens: 512,
        };

        let body = serde_json::to_value(adapter.convert_request(&request)).unwrap();
        assert_eq!(body["system"], "You are terse.");
        assert_eq!(body["temperature"], 1.0);
        let roles: Vec<_> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, ["user", "assistant", "user"]);
    }

    #[test]
    fn no_system_field_without_system_prompt() {
        let adapter = AnthropicAdapter::new(None);
        let request = ChatRequest {
            model: "claude-3-haiku".into(),
            messages: vec![ChatMessage::new(Role::User, "hi")],
            temperature: 0.5,
            max_tokens: 16,
        };
        let body = serde_json::to_value(adapter.convert_request(&request)).unwrap();
        assert!(body.get("system").is_none());
    }

    #[test]
    fn text_deltas_are_extracted() {
        let frame = parse_anthropic_event(
            &event(
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            ),
            "claude-3-opus",
        );
        assert!(matches!(frame, Frame::Text(t) if t == "Hi"));
    }

    #[test]
    fn bookkeeping_events_are_skipped() {
        for (name, data) in [
            ("message_start", r#"{"type":"message_start","message":{"id":"msg_1"}}"#),
            ("content_block_start", r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#),
            ("ping", r#"{"type":"ping"}"#),
            ("content_block_stop", r#"{"type":"content_block_stop","index":0}"#),
            ("message_delta", r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"}}"#),
        ] {
            assert!(
                matches!(parse_anthropic_event(&event(name, data), "claude-3-opus"), Frame::Skip),
                "{name} should be skipped"
            );
        }
    }

    #[test]
    fn stop_and_error_events() {
        let stop = parse_anthropic_event(&event("message_stop", r#"{"type":"message_stop"}"#), "claude-3-opus");
        assert!(matches!(stop, Frame::Done));

        let error = parse_anthropic_event(
            &event(
                "error",
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
            ),
            "claude-3-opus",
        );
        assert!(matches!(error, Frame::Error(ProviderError::UpstreamUnknown(_))));
    }
}
