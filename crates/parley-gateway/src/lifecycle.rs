//! Per-request chat state machine.
//!
//! ```text
//! Idle -> Resolving -> Streaming -> Completing -> Done
//!   \________\____________\___________\---> ErrorTerminal
//! ```
//!
//! Response headers are committed on `Resolving -> Streaming`; every failure
//! that should change the status code must happen before it.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Idle,
    Resolving,
    Streaming,
    Completing,
    Done,
    ErrorTerminal,
}

impl ChatState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Streaming => "streaming",
            Self::Completing => "completing",
            Self::Done => "done",
            Self::ErrorTerminal => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::ErrorTerminal)
    }

    fn can_advance_to(self, next: ChatState) -> bool {
        use ChatState::*;
        match (self, next) {
            (Idle, Resolving) | (Resolving, Streaming) | (Streaming, Completing) => true,
            (Completing, Done) => true,
            (from, ErrorTerminal) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid chat state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ChatState,
    pub to: ChatState,
}

/// Receives every state change a chat request makes, including the ones that
/// happen after the response body has been handed to the client.
pub trait LifecycleObserver: Send + Sync {
    fn on_transition(&self, request_id: &str, from: ChatState, to: ChatState);
}

/// State of one chat request plus the transitions it has taken.
#[derive(Clone)]
pub struct ChatLifecycle {
    request_id: String,
    state: ChatState,
    history: Vec<ChatState>,
    observer: Option<Arc<dyn LifecycleObserver>>,
}

impl fmt::Debug for ChatLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatLifecycle")
            .field("request_id", &self.request_id)
            .field("state", &self.state)
            .field("history", &self.history)
            .finish_non_exhaustive()
    }
}

impl ChatLifecycle {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            state: ChatState::Idle,
            history: vec![ChatState::Idle],
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Option<Arc<dyn LifecycleObserver>>) -> Self {
        self.observer = observer;
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    /// Every state visited so far, starting with `Idle`.
    pub fn history(&self) -> &[ChatState] {
        &self.history
    }

    pub fn advance(&mut self, next: ChatState) -> Result<(), InvalidTransition> {
        if !self.state.can_advance_to(next) {
            let err = InvalidTransition {
                from: self.state,
                to: next,
            };
            warn!(request_id = %self.request_id, "{err}");
            return Err(err);
        }
        debug!(
            request_id = %self.request_id,
            from = %self.state,
            to = %next,
            "chat state transition"
        );
        self.enter(next);
        Ok(())
    }

    /// Move to `ErrorTerminal`, recording why. No-op once terminal.
    pub fn fail(&mut self, reason: &str) {
        if self.state.is_terminal() {
            return;
        }
        debug!(request_id = %self.request_id, from = %self.state, reason, "chat request failed");
        self.enter(ChatState::ErrorTerminal);
    }

    fn enter(&mut self, next: ChatState) {
        let from = std::mem::replace(&mut self.state, next);
        self.history.push(next);
        if let Some(observer) = &self.observer {
            observer.on_transition(&self.request_id, from, next);
        }
    }
}
