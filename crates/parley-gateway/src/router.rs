use std::time::Duration;

use axum::Router;
use axum::http::HeaderName;
use axum::routing::{get, post};
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::chat::{self, CONVERSATION_ID_HEADER};
use crate::state::SharedState;

/// Build the application router with all routes.
pub fn build_router(state: SharedState) -> Router {
    let rate_limit = state.config.gateway.rate_limit.clone();

    // Browser clients need to read the conversation id of a streamed reply.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(CONVERSATION_ID_HEADER)]);

    let router = Router::new()
        .route("/health", get(health))
        .route("/agents/{agent_id}/chat", post(chat::chat))
        .route(
            "/agents/{agent_id}/conversations/{conversation_id}/messages",
            get(chat::history),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    if !rate_limit.enabled {
        return router;
    }

    // Per-IP rate limit from config (default: 1 req/sec, burst 60).
    let Some(governor_conf) = GovernorConfigBuilder::default()
        .per_second(rate_limit.per_second)
        .burst_size(rate_limit.burst_size)
        .finish()
    else {
        warn!(
            per_second = rate_limit.per_second,
            burst_size = rate_limit.burst_size,
            "invalid rate limit settings, rate limiting disabled"
        );
        return router;
    };
    let governor_limiter = governor_conf.limiter().clone();

    // Clean up rate-limiter state for inactive IPs.
    tokio::spawn(async move {
        let interval = Duration::from_secs(60);
        loop {
            tokio::time::sleep(interval).await;
            governor_limiter.retain_recent();
        }
    });

    router.layer(GovernorLayer::new(governor_conf))
}

async fn health() -> &'static str {
    "ok"
}
