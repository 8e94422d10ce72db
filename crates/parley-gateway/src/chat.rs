use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::future::BoxFuture;
use parley_agents::{
    ChatRequest, Completion, CompletionOutcome, CompletionStream, OnComplete, ProviderKind,
    Resolution, TextStream, context,
};
use parley_common::{AgentId, ConversationId, OwnerId, Role};
use parley_db::ConversationStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{ChatError, ChatErrorResponse};
use crate::lifecycle::{ChatLifecycle, ChatState};
use crate::state::{AppState, SharedState};

pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Everything resolved before the response is committed.
struct Prepared {
    conversation_id: ConversationId,
    upstream: TextStream,
}

/// POST /agents/{agent_id}/chat: stream an assistant reply as plain text.
pub async fn chat(
    State(state): State<SharedState>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Response, ChatErrorResponse> {
    let mut lifecycle = ChatLifecycle::new(Uuid::new_v4().to_string())
        .with_observer(state.lifecycle_observer.clone());

    let prepared = match prepare(&state, &mut lifecycle, AgentId::from(agent_id), &headers, body).await {
        Ok(prepared) => prepared,
        Err(err) => {
            lifecycle.fail(&err.error.to_string());
            return Err(err);
        }
    };

    // Headers are committed from here on.
    if let Err(e) = lifecycle.advance(ChatState::Streaming) {
        return Err(ChatError::Internal(e.to_string()).with_conversation(&prepared.conversation_id));
    }

    let on_complete = persist_on_complete(
        state.conversations.clone(),
        prepared.conversation_id.clone(),
        lifecycle,
    );
    let stream = CompletionStream::new(prepared.upstream, on_complete);
    let body = Body::from_stream(stream.map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk))));

    let mut response = Response::new(body);
    let response_headers = response.headers_mut();
    response_headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(prepared.conversation_id.as_str()) {
        response_headers.insert(CONVERSATION_ID_HEADER, value);
    }
    Ok(response)
}

async fn prepare(
    state: &AppState,
    lifecycle: &mut ChatLifecycle,
    agent_id: AgentId,
    headers: &HeaderMap,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Prepared, ChatErrorResponse> {
    let owner = state
        .auth
        .resolve_caller_id(headers)
        .await
        .ok_or(ChatError::Unauthorized)?;

    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            debug!("rejected chat body: {rejection}");
            return Err(ChatError::MessageRequired.into());
        }
    };
    let message = body
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or(ChatError::MessageRequired)?;
    let requested = body
        .conversation_id
        .filter(|id| !id.trim().is_empty())
        .map(ConversationId::from);

    lifecycle
        .advance(ChatState::Resolving)
        .map_err(|e| ChatError::Internal(e.to_string()))?;

    let agent = state
        .agents
        .get_agent(&agent_id, &owner)
        .await
        .map_err(ChatError::from)?
        .ok_or(ChatError::AgentNotFound)?;

    let provider = ProviderKind::from_model(&agent.model).ok_or_else(|| ChatError::UnsupportedModel {
        model: agent.model.clone(),
    })?;

    let api_key = resolve_api_key(state, &owner, provider).await?;

    let conversation = state
        .conversations
        .load_or_create(requested.as_ref(), &agent.id, &owner, &message)
        .await
        .map_err(ChatError::from)?
        .ok_or(ChatError::ConversationNotFound)?;
    let in_conversation = |err: ChatError| err.with_conversation(&conversation.id);

    let prior = state
        .conversations
        .list_messages(&conversation.id)
        .await
        .map_err(|e| in_conversation(e.into()))?;
    let messages = context::build(&agent, &prior, &message).map_err(|e| in_conversation(e.into()))?;

    // The user's turn is stored before the provider is called so it survives
    // any upstream failure.
    state
        .conversations
        .append_message(&conversation.id, Role::User, &message)
        .await
        .map_err(|e| in_conversation(e.into()))?;

    let adapter = state.providers.get(provider).ok_or_else(|| {
        in_conversation(ChatError::Internal(format!("no adapter registered for {provider}")))
    })?;

    let request = ChatRequest::for_agent(&agent, messages);
    info!(
        agent_id = %agent.id,
        conversation_id = %conversation.id,
        provider = provider.as_str(),
        context_messages = request.messages.len(),
        "starting chat stream"
    );

    let upstream = adapter
        .stream(&request, &api_key)
        .await
        .map_err(|e| in_conversation(e.into()))?;

    Ok(Prepared {
        conversation_id: conversation.id.clone(),
        upstream,
    })
}

async fn resolve_api_key(
    state: &AppState,
    owner: &OwnerId,
    provider: ProviderKind,
) -> Result<String, ChatError> {
    let credentials = state.credentials.list_for_owner(owner).await?;
    let credential = match state.resolver.resolve(&credentials, provider.as_str()) {
        Resolution::Found { credential, step } => {
            debug!(credential_id = %credential.id, ?step, "using credential");
            credential
        }
        Resolution::NoCredentials => return Err(ChatError::NoCredentials),
        Resolution::NoMatch => return Err(ChatError::NoMatchingCredential { provider }),
    };
    Ok(state.credentials.decrypt(credential).await?)
}

/// Completion hook: moves the lifecycle on and stores whatever text the
/// caller received, including partial replies.
///
/// The body does not end until this has run, so a client that read the whole
/// reply can send its next turn straight away.
fn persist_on_complete(
    store: Arc<dyn ConversationStore>,
    conversation_id: ConversationId,
    lifecycle: ChatLifecycle,
) -> OnComplete {
    Box::new(move |completion: Completion| -> BoxFuture<'static, ()> {
        Box::pin(store_reply(store, conversation_id, lifecycle, completion))
    })
}

async fn store_reply(
    store: Arc<dyn ConversationStore>,
    conversation_id: ConversationId,
    mut lifecycle: ChatLifecycle,
    completion: Completion,
) {
    let Completion { text, outcome } = completion;
    match &outcome {
        CompletionOutcome::Failed(err) => lifecycle.fail(&err.to_string()),
        CompletionOutcome::Finished | CompletionOutcome::Disconnected => {
            if let Err(e) = lifecycle.advance(ChatState::Completing) {
                debug!(conversation_id = %conversation_id, "{e}");
            }
        }
    }
    info!(
        conversation_id = %conversation_id,
        chars = text.chars().count(),
        outcome = ?outcome,
        "chat stream ended"
    );

    if text.is_empty() {
        debug!(conversation_id = %conversation_id, "empty reply, nothing to store");
        finish(&mut lifecycle);
        return;
    }

    match store.append_assistant_message(&conversation_id, &text).await {
        Ok(message) => {
            debug!(message_id = %message.id, "stored assistant reply");
            finish(&mut lifecycle);
        }
        Err(e) => {
            error!(conversation_id = %conversation_id, "failed to store assistant reply: {e}");
            lifecycle.fail("persistence failed");
        }
    }
}

/// `Completing -> Done`; a failed stream stays in `ErrorTerminal`.
fn finish(lifecycle: &mut ChatLifecycle) {
    if lifecycle.state() != ChatState::Completing {
        return;
    }
    if let Err(e) = lifecycle.advance(ChatState::Done) {
        debug!(request_id = lifecycle.request_id(), "{e}");
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationHistory {
    pub conversation_id: String,
    pub title: String,
    pub messages: Vec<HistoryMessage>,
}

/// GET /agents/{agent_id}/conversations/{conversation_id}/messages
pub async fn history(
    State(state): State<SharedState>,
    Path((agent_id, conversation_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<ConversationHistory>, ChatError> {
    let owner = state
        .auth
        .resolve_caller_id(&headers)
        .await
        .ok_or(ChatError::Unauthorized)?;

    let agent_id = AgentId::from(agent_id);
    state
        .agents
        .get_agent(&agent_id, &owner)
        .await?
        .ok_or(ChatError::AgentNotFound)?;

    let conversation = state
        .conversations
        .get_conversation(&ConversationId::from(conversation_id))
        .await?
        .filter(|c| c.belongs_to(&agent_id, &owner))
        .ok_or(ChatError::ConversationNotFound)?;

    let messages = state
        .conversations
        .list_messages(&conversation.id)
        .await?
        .into_iter()
        .map(|m| HistoryMessage {
            id: m.id.to_string(),
            role: m.role,
            content: m.content,
            created_at: m.created_at,
        })
        .collect();

    Ok(Json(ConversationHistory {
        conversation_id: conversation.id.to_string(),
        title: conversation.title,
        messages,
    }))
}
