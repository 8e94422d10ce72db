use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures::{StreamExt, stream};
use parley_agents::{
    ChatRequest, ProviderAdapter, ProviderError, ProviderKind, ProviderRegistry, TextStream,
};
use parley_common::{
    Agent, AgentId, Conversation, ConversationId, Error, Message, OwnerId, Result as StoreResult,
    Role,
};
use parley_config::AppConfig;
use parley_db::{AgentStore, ConversationStore, CredentialStore, SqliteStore};
use parley_gateway::router::build_router;
use parley_gateway::{AppState, AuthContext, ChatState, LifecycleObserver, StaticAuth};
use parley_security::SecretCipher;
use serde_json::{Value, json};
use tower::ServiceExt;

type Calls = Arc<Mutex<Vec<(ChatRequest, String)>>>;

#[derive(Clone)]
enum Script {
    Chunks(Vec<Result<String, ProviderError>>),
    Fail(ProviderError),
}

/// Adapter that replays a fixed script and records what it was asked.
struct ScriptedAdapter {
    provider: ProviderKind,
    script: Script,
    calls: Calls,
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        api_key: &str,
    ) -> Result<TextStream, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.clone(), api_key.to_string()));
        match &self.script {
            Script::Fail(err) => Err(err.clone()),
            Script::Chunks(items) => Ok(Box::pin(stream::iter(items.clone()))),
        }
    }
}

/// Conversation store whose assistant writes always fail.
struct ReplyWritesFail(Arc<SqliteStore>);

#[async_trait]
impl ConversationStore for ReplyWritesFail {
    async fn create_conversation(
        &self,
        agent_id: &AgentId,
        owner_id: &OwnerId,
        title: &str,
    ) -> StoreResult<Conversation> {
        self.0.create_conversation(agent_id, owner_id, title).await
    }

    async fn get_conversation(&self, id: &ConversationId) -> StoreResult<Option<Conversation>> {
        self.0.get_conversation(id).await
    }

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        role: Role,
        content: &str,
    ) -> StoreResult<Message> {
        self.0.append_message(conversation_id, role, content).await
    }

    async fn list_messages(&self, conversation_id: &ConversationId) -> StoreResult<Vec<Message>> {
        self.0.list_messages(conversation_id).await
    }

    async fn append_assistant_message(
        &self,
        _conversation_id: &ConversationId,
        _content: &str,
    ) -> StoreResult<Message> {
        Err(Error::Database("disk I/O error".into()))
    }
}

type Transitions = Arc<Mutex<Vec<(String, ChatState)>>>;

/// Records the state each request enters, in order.
struct TransitionLog(Transitions);

impl LifecycleObserver for TransitionLog {
    fn on_transition(&self, request_id: &str, _from: ChatState, to: ChatState) {
        self.0.lock().unwrap().push((request_id.to_string(), to));
    }
}

fn chunks(parts: &[&str]) -> Script {
    Script::Chunks(parts.iter().map(|p| Ok(p.to_string())).collect())
}

struct Harness {
    app: Router,
    store: Arc<SqliteStore>,
    agent: Agent,
    calls: Calls,
    transitions: Transitions,
}

struct Setup {
    model: &'static str,
    system_prompt: Option<&'static str>,
    credentials: Vec<(&'static str, &'static str)>,
    script: Script,
    auth: Option<Arc<dyn AuthContext>>,
    allow_fallback: bool,
    reply_writes_fail: bool,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            model: "gpt-4o",
            system_prompt: None,
            credentials: vec![("openai", "sk-openai")],
            script: chunks(&["Hel", "lo, ", "world"]),
            auth: None,
            allow_fallback: true,
            reply_writes_fail: false,
        }
    }
}

fn owner() -> OwnerId {
    OwnerId::from("owner-1")
}

async fn harness(setup: Setup) -> Harness {
    let store = Arc::new(SqliteStore::in_memory(SecretCipher::from_key([5u8; 32])).unwrap());

    let mut agent = Agent::new(owner(), "helper", setup.model);
    if let Some(prompt) = setup.system_prompt {
        agent = agent.with_system_prompt(prompt);
    }
    store.create_agent(&agent).await.unwrap();
    for (service, secret) in &setup.credentials {
        store.add_credential(&owner(), service, secret).await.unwrap();
    }

    let calls: Calls = Arc::default();
    let mut registry = ProviderRegistry::new();
    for provider in [ProviderKind::OpenAi, ProviderKind::Anthropic] {
        registry.register(Arc::new(ScriptedAdapter {
            provider,
            script: setup.script.clone(),
            calls: calls.clone(),
        }));
    }

    let mut config = AppConfig::default();
    config.gateway.rate_limit.enabled = false;
    config.credentials.allow_fallback = setup.allow_fallback;

    let auth = setup
        .auth
        .unwrap_or_else(|| Arc::new(StaticAuth::new(owner())) as Arc<dyn AuthContext>);
    let conversations: Arc<dyn ConversationStore> = if setup.reply_writes_fail {
        Arc::new(ReplyWritesFail(store.clone()))
    } else {
        store.clone()
    };
    let transitions: Transitions = Arc::default();
    let state = AppState::new(
        config,
        store.clone(),
        store.clone(),
        conversations,
        auth,
        registry,
    )
    .with_lifecycle_observer(Arc::new(TransitionLog(transitions.clone())));

    Harness {
        app: build_router(Arc::new(state)),
        store,
        agent,
        calls,
        transitions,
    }
}

impl Harness {
    async fn send(&self, agent_id: &str, body: Value) -> Response {
        self.send_raw(agent_id, body.to_string()).await
    }

    async fn send_raw(&self, agent_id: &str, body: String) -> Response {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/agents/{agent_id}/chat"))
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn chat(&self, body: Value) -> Response {
        self.send(self.agent.id.as_str(), body).await
    }

    /// Poll until the conversation holds `count` messages.
    async fn wait_for_messages(&self, conversation_id: &ConversationId, count: usize) -> Vec<Message> {
        for _ in 0..200 {
            let messages = self.store.list_messages(conversation_id).await.unwrap();
            if messages.len() >= count {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("conversation {conversation_id} never reached {count} messages");
    }

    fn recorded(&self) -> Vec<(ChatRequest, String)> {
        self.calls.lock().unwrap().clone()
    }

    async fn messages(&self, conversation_id: &ConversationId) -> Vec<(Role, String)> {
        self.store
            .list_messages(conversation_id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect()
    }

    /// States entered by the most recent request, in order.
    fn last_request_states(&self) -> Vec<ChatState> {
        let log = self.transitions.lock().unwrap();
        let Some((last, _)) = log.last() else {
            return Vec::new();
        };
        log.iter()
            .filter(|(id, _)| id == last)
            .map(|(_, state)| *state)
            .collect()
    }
}

fn conversation_id(response: &Response) -> ConversationId {
    let value = response
        .headers()
        .get("x-conversation-id")
        .expect("response should carry x-conversation-id");
    ConversationId::from(value.to_str().unwrap())
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn error_of(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    body["error"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn streams_reply_and_persists_it() {
    let h = harness(Setup::default()).await;

    let response = h.chat(json!({"message": "hi"})).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );
    let conversation = conversation_id(&response);
    assert_eq!(body_text(response).await, "Hello, world");

    // Stored before the body ended.
    assert_eq!(
        h.messages(&conversation).await,
        [
            (Role::User, "hi".to_string()),
            (Role::Assistant, "Hello, world".to_string()),
        ]
    );
    assert_eq!(
        h.last_request_states(),
        [
            ChatState::Resolving,
            ChatState::Streaming,
            ChatState::Completing,
            ChatState::Done
        ]
    );

    let stored = h.store.get_conversation(&conversation).await.unwrap().unwrap();
    assert_eq!(stored.title, "hi");
    assert_eq!(h.recorded()[0].1, "sk-openai");
}

#[tokio::test]
async fn client_disconnect_persists_partial_reply() {
    let h = harness(Setup::default()).await;

    let response = h.chat(json!({"message": "tell me a story"})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let conversation = conversation_id(&response);

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    assert_eq!(first, "Hel");
    drop(body);

    let messages = h.wait_for_messages(&conversation, 2).await;
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hel");
}

#[tokio::test]
async fn mid_stream_failure_keeps_sent_bytes_and_stores_them() {
    let h = harness(Setup {
        script: Script::Chunks(vec![
            Ok("par".to_string()),
            Err(ProviderError::UpstreamUnknown("connection reset".into())),
            Ok("never".to_string()),
        ]),
        ..Setup::default()
    })
    .await;

    let response = h.chat(json!({"message": "hi"})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let conversation = conversation_id(&response);
    assert_eq!(body_text(response).await, "par");

    assert_eq!(
        h.messages(&conversation).await[1],
        (Role::Assistant, "par".to_string())
    );
    assert_eq!(
        h.last_request_states(),
        [ChatState::Resolving, ChatState::Streaming, ChatState::ErrorTerminal]
    );
}

#[tokio::test]
async fn reply_storage_failure_leaves_stream_intact() {
    let h = harness(Setup {
        reply_writes_fail: true,
        ..Setup::default()
    })
    .await;

    let response = h.chat(json!({"message": "hi"})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let conversation = conversation_id(&response);
    assert_eq!(body_text(response).await, "Hello, world");

    assert_eq!(h.messages(&conversation).await, [(Role::User, "hi".to_string())]);
    assert_eq!(
        h.last_request_states(),
        [
            ChatState::Resolving,
            ChatState::Streaming,
            ChatState::Completing,
            ChatState::ErrorTerminal
        ]
    );
}

#[tokio::test]
async fn empty_reply_is_not_stored() {
    let h = harness(Setup {
        script: chunks(&[]),
        ..Setup::default()
    })
    .await;

    let response = h.chat(json!({"message": "hi"})).await;
    let conversation = conversation_id(&response);
    assert_eq!(body_text(response).await, "");

    assert_eq!(h.messages(&conversation).await, [(Role::User, "hi".to_string())]);
    assert_eq!(h.last_request_states().last(), Some(&ChatState::Done));
}

#[tokio::test]
async fn second_turn_sees_full_history() {
    let h = harness(Setup::default()).await;

    let first = h.chat(json!({"message": "first question"})).await;
    let conversation = conversation_id(&first);
    body_text(first).await;

    let second = h
        .chat(json!({"message": "second question", "conversationId": conversation.as_str()}))
        .await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(conversation_id(&second), conversation);
    body_text(second).await;

    let calls = h.recorded();
    assert_eq!(calls.len(), 2);
    let context: Vec<_> = calls[1]
        .0
        .messages
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        context,
        [
            (Role::User, "first question"),
            (Role::Assistant, "Hello, world"),
            (Role::User, "second question"),
        ]
    );
    assert_eq!(
        h.messages(&conversation).await,
        [
            (Role::User, "first question".to_string()),
            (Role::Assistant, "Hello, world".to_string()),
            (Role::User, "second question".to_string()),
            (Role::Assistant, "Hello, world".to_string()),
        ]
    );
}

#[tokio::test]
async fn back_to_back_turns_keep_stored_order() {
    let h = harness(Setup::default()).await;

    let mut conversation: Option<ConversationId> = None;
    for text in ["one", "two", "three"] {
        let mut body = json!({"message": text});
        if let Some(id) = &conversation {
            body["conversationId"] = json!(id.as_str());
        }
        let response = h.chat(body).await;
        assert_eq!(response.status(), StatusCode::OK);
        conversation = Some(conversation_id(&response));
        body_text(response).await;
    }

    let roles: Vec<Role> = h
        .messages(&conversation.unwrap())
        .await
        .into_iter()
        .map(|(role, _)| role)
        .collect();
    assert_eq!(
        roles,
        [
            Role::User,
            Role::Assistant,
            Role::User,
            Role::Assistant,
            Role::User,
            Role::Assistant
        ]
    );
    assert_eq!(h.recorded()[2].0.messages.len(), 5);
}

#[tokio::test]
async fn system_prompt_is_sent_but_never_stored() {
    let h = harness(Setup {
        system_prompt: Some("You are a pirate."),
        ..Setup::default()
    })
    .await;

    let mut conversation: Option<ConversationId> = None;
    for (turn, text) in ["one", "two", "three"].into_iter().enumerate() {
        let mut body = json!({"message": text});
        if let Some(id) = &conversation {
            body["conversationId"] = json!(id.as_str());
        }
        let response = h.chat(body).await;
        let id = conversation_id(&response);
        body_text(response).await;
        assert_eq!(h.messages(&id).await.len(), (turn + 1) * 2);
        conversation = Some(id);
    }

    for (request, _) in h.recorded() {
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].content, "You are a pirate.");
        assert_eq!(
            request.messages.iter().filter(|m| m.role == Role::System).count(),
            1
        );
    }

    let stored = h
        .store
        .list_messages(&conversation.unwrap())
        .await
        .unwrap();
    assert_eq!(stored.len(), 6);
    assert!(stored.iter().all(|m| m.role != Role::System));
}

#[tokio::test]
async fn request_uses_agent_settings() {
    let h = harness(Setup {
        model: "claude-3-5-sonnet-latest",
        credentials: vec![("Anthropic", "sk-ant-key")],
        ..Setup::default()
    })
    .await;

    let response = h.chat(json!({"message": "hi"})).await;
    assert_eq!(response.status(), StatusCode::OK);
    body_text(response).await;

    let (request, key) = h.recorded().remove(0);
    assert_eq!(request.model, "claude-3-5-sonnet-latest");
    assert_eq!(request.temperature, 0.7);
    assert_eq!(request.max_tokens, 1024);
    assert_eq!(key, "sk-ant-key");
}

#[tokio::test]
async fn credential_cascade_picks_matching_label() {
    let h = harness(Setup {
        credentials: vec![("Anthropic", "sk-ant-key"), ("openai", "sk-openai")],
        ..Setup::default()
    })
    .await;
    body_text(h.chat(json!({"message": "hi"})).await).await;
    assert_eq!(h.recorded()[0].1, "sk-openai");

    let h = harness(Setup {
        credentials: vec![("Anthropic", "sk-ant-key"), ("OpenAI", "sk-openai-upper")],
        ..Setup::default()
    })
    .await;
    body_text(h.chat(json!({"message": "hi"})).await).await;
    assert_eq!(h.recorded()[0].1, "sk-openai-upper");
}

#[tokio::test]
async fn unmatched_label_falls_back_to_first_credential() {
    let h = harness(Setup {
        credentials: vec![("github", "ghp-token")],
        ..Setup::default()
    })
    .await;

    let response = h.chat(json!({"message": "hi"})).await;
    assert_eq!(response.status(), StatusCode::OK);
    body_text(response).await;
    assert_eq!(h.recorded()[0].1, "ghp-token");
}

#[tokio::test]
async fn unmatched_label_is_rejected_when_fallback_disabled() {
    let h = harness(Setup {
        credentials: vec![("github", "ghp-token")],
        allow_fallback: false,
        ..Setup::default()
    })
    .await;

    let response = h.chat(json!({"message": "hi"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_of(response).await.contains("No API connection matches provider openai"));
    assert!(h.recorded().is_empty());
}

#[tokio::test]
async fn unauthenticated_request_is_rejected() {
    let h = harness(Setup {
        auth: Some(Arc::new(StaticAuth::anonymous()) as Arc<dyn AuthContext>),
        ..Setup::default()
    })
    .await;

    let response = h.chat(json!({"message": "hi"})).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_of(response).await, "Unauthorized");
}

#[tokio::test]
async fn missing_or_blank_message_is_rejected() {
    let h = harness(Setup::default()).await;

    for body in [
        json!({}).to_string(),
        json!({"message": ""}).to_string(),
        json!({"message": "   "}).to_string(),
        json!({"message": 42}).to_string(),
        "not json".to_string(),
    ] {
        let response = h.send_raw(h.agent.id.as_str(), body.clone()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(error_of(response).await, "Message is required");
    }
    assert!(h.recorded().is_empty());
}

#[tokio::test]
async fn unknown_or_foreign_agent_is_not_found() {
    let h = harness(Setup::default()).await;

    let response = h.send("no-such-agent", json!({"message": "hi"})).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_of(response).await, "Agent not found");

    let foreign = Agent::new(OwnerId::from("someone-else"), "theirs", "gpt-4o");
    h.store.create_agent(&foreign).await.unwrap();
    let response = h.send(foreign.id.as_str(), json!({"message": "hi"})).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let h = harness(Setup::default()).await;

    let response = h
        .chat(json!({"message": "hi", "conversationId": "does-not-exist"}))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_of(response).await, "Conversation not found");
    assert!(h.recorded().is_empty());
}

#[tokio::test]
async fn owner_without_credentials_gets_bad_request() {
    let h = harness(Setup {
        credentials: vec![],
        ..Setup::default()
    })
    .await;

    let response = h.chat(json!({"message": "hi"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get("x-conversation-id").is_none());
    assert_eq!(
        error_of(response).await,
        "No API connections found for this agent"
    );
    assert!(h.recorded().is_empty());
}

#[tokio::test]
async fn unsupported_model_family_is_bad_request() {
    let h = harness(Setup {
        model: "llama3",
        ..Setup::default()
    })
    .await;

    let response = h.chat(json!({"message": "hi"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_of(response).await.contains("model is not available: llama3"));
}

#[tokio::test]
async fn provider_failures_map_to_status_codes() {
    let cases = [
        (
            ProviderError::InvalidCredential {
                provider: ProviderKind::OpenAi,
            },
            StatusCode::UNAUTHORIZED,
            "Invalid API key. Please check your OpenAI API connection settings.",
        ),
        (
            ProviderError::RateLimited {
                provider: ProviderKind::OpenAi,
            },
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded",
        ),
        (
            ProviderError::ModelUnavailable {
                provider: ProviderKind::OpenAi,
                model: "gpt-4o".into(),
            },
            StatusCode::BAD_REQUEST,
            "model is not available: gpt-4o",
        ),
        (
            ProviderError::UpstreamUnknown("OpenAI API error (502): <html>".into()),
            StatusCode::INTERNAL_SERVER_ERROR,
            "Please try again",
        ),
    ];

    for (failure, status, fragment) in cases {
        let h = harness(Setup {
            script: Script::Fail(failure.clone()),
            ..Setup::default()
        })
        .await;

        let response = h.chat(json!({"message": "hi"})).await;
        assert_eq!(response.status(), status, "{failure:?}");
        let conversation = conversation_id(&response);
        let error = error_of(response).await;
        assert!(error.contains(fragment), "{error:?} should contain {fragment:?}");
        assert!(!error.contains("<html>"));

        // The user's turn survives the provider failure.
        let messages = h.store.list_messages(&conversation).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }
}

#[tokio::test]
async fn history_lists_conversation_messages() {
    let h = harness(Setup::default()).await;

    let response = h.chat(json!({"message": "hi"})).await;
    let conversation = conversation_id(&response);
    body_text(response).await;

    let request = Request::builder()
        .uri(format!(
            "/agents/{}/conversations/{}/messages",
            h.agent.id, conversation
        ))
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["conversationId"], conversation.as_str());
    assert_eq!(body["title"], "hi");
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][1]["role"], "assistant");
    assert_eq!(body["messages"][1]["content"], "Hello, world");
    assert!(body["messages"][0]["createdAt"].is_string());

    let request = Request::builder()
        .uri(format!("/agents/{}/conversations/missing/messages", h.agent.id))
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_check() {
    let h = harness(Setup::default()).await;
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
}
