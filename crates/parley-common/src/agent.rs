use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentId, CredentialId, OwnerId};

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// An AI agent configured by its owner. Immutable for the duration of a chat call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub owner_id: OwnerId,
    pub name: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Agent {
    pub fn new(owner_id: OwnerId, name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            owner_id,
            name: name.into(),
            model: model.into(),
            system_prompt: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Temperature clamped into the accepted `[0, 2]` range.
    pub fn effective_temperature(&self) -> f64 {
        if self.temperature.is_finite() {
            self.temperature.clamp(0.0, 2.0)
        } else {
            DEFAULT_TEMPERATURE
        }
    }
}

/// A stored upstream API connection. `service` is whatever label the owner typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub owner_id: OwnerId,
    pub service: String,
    /// Encrypted secret as stored; only `CredentialStore::decrypt` can open it.
    #[serde(skip_serializing)]
    pub secret: String,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(owner_id: OwnerId, service: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: CredentialId::new(),
            owner_id,
            service: service.into(),
            secret: secret.into(),
            created_at: Utc::now(),
        }
    }
}
