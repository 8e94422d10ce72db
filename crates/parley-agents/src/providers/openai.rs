use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::classify_openai;
use super::sse::{Frame, SseEvent, text_stream};
use super::{ChatRequest, ProviderAdapter, ProviderError, ProviderKind, TextStream};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Streams chat completions from the OpenAI API.
#[derive(Clone)]
pub struct OpenAiAdapter {
    client: Client,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string());
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn convert_request<'a>(&self, request: &'a ChatRequest) -> OpenAiRequest<'a> {
        OpenAiRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| OpenAiMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        api_key: &str,
    ) -> Result<TextStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.convert_request(request);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::request_failed(ProviderKind::OpenAi, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            debug!(%status, "openai rejected chat request");
            return Err(classify_openai(Some(status), &error_text, &request.model));
        }

        let model = request.model.clone();
        Ok(text_stream(response.bytes_stream(), move |event| {
            parse_openai_event(event, &model)
        }))
    }
}

fn parse_openai_event(event: &SseEvent, model: &str) -> Frame {
    let data = event.data.trim();
    if data == "[DONE]" {
        return Frame::Done;
    }

    let chunk: OpenAiStreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!(error = %e, "skipping unparseable openai stream event");
            return Frame::Skip;
        }
    };

    if chunk.error.is_some() {
        return Frame::Error(classify_openai(None, data, model));
    }

    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .map(Frame::Text)
        .unwrap_or(Frame::Skip)
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiDelta,
}

#[derive(Deserialize, Default)]
struct OpenAiDelta {
    content: Option<String>,
}
