use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use parley_common::OwnerId;
use parley_db::TokenStore;
use tracing::warn;

/// Identifies the caller of a request.
#[async_trait]
pub trait AuthContext: Send + Sync {
    /// The owner making the request, or `None` when unauthenticated.
    async fn resolve_caller_id(&self, headers: &HeaderMap) -> Option<OwnerId>;
}

/// Authenticates `Authorization: Bearer <token>` against issued tokens.
pub struct BearerTokenAuth {
    tokens: Arc<dyn TokenStore>,
}

impl BearerTokenAuth {
    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        Self { tokens }
    }
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[async_trait]
impl AuthContext for BearerTokenAuth {
    async fn resolve_caller_id(&self, headers: &HeaderMap) -> Option<OwnerId> {
        let token = bearer_token(headers)?;
        match self.tokens.owner_for_token(token).await {
            Ok(owner) => owner,
            Err(e) => {
                warn!("token lookup failed: {e}");
                None
            }
        }
    }
}

/// Treats every request as coming from one fixed owner.
pub struct StaticAuth {
    owner: Option<OwnerId>,
}

impl StaticAuth {
    pub fn new(owner: OwnerId) -> Self {
        Self { owner: Some(owner) }
    }

    pub fn anonymous() -> Self {
        Self { owner: None }
    }
}

#[async_trait]
impl AuthContext for StaticAuth {
    async fn resolve_caller_id(&self, _headers: &HeaderMap) -> Option<OwnerId> {
        self.owner.clone()
    }
}
