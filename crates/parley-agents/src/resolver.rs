//! Picks which stored credential to use for a provider.
//!
//! Credential labels are free text typed by the owner ("openai", "OpenAI",
//! "open-ai-prod", ...), so matching loosens step by step and the first step
//! that matches wins:
//!
//! 1. exact, case-sensitive label match
//! 2. case-insensitive label match
//! 3. case-insensitive substring match in either direction
//! 4. the first credential in listing order, when fallback is allowed
//!
//! An owner with no credentials at all always gets [`Resolution::NoCredentials`].

use parley_common::Credential;
use tracing::{debug, warn};

/// Which cascade step produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStep {
    Exact,
    CaseInsensitive,
    Substring,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution<'a> {
    Found {
        credential: &'a Credential,
        step: MatchStep,
    },
    /// Credentials exist but none matched and fallback is disabled.
    NoMatch,
    NoCredentials,
}

#[derive(Debug, Clone, Copy)]
pub struct CredentialResolver {
    allow_fallback: bool,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self {
            allow_fallback: true,
        }
    }
}

impl CredentialResolver {
    pub fn new(allow_fallback: bool) -> Self {
        Self { allow_fallback }
    }

    pub fn allows_fallback(&self) -> bool {
        self.allow_fallback
    }

    pub fn resolve<'a>(&self, credentials: &'a [Credential], provider: &str) -> Resolution<'a> {
        let Some(first) = credentials.first() else {
            return Resolution::NoCredentials;
        };

        let wanted = provider.trim().to_lowercase();
        let found = |credential, step| {
            debug!(service = %provider, ?step, "resolved provider credential");
            Resolution::Found { credential, step }
        };

        if let Some(c) = credentials.iter().find(|c| c.service == provider) {
            return found(c, MatchStep::Exact);
        }

        if let Some(c) = credentials
            .iter()
            .find(|c| c.service.trim().to_lowercase() == wanted)
        {
            return found(c, MatchStep::CaseInsensitive);
        }

        if !wanted.is_empty()
            && let Some(c) = credentials.iter().find(|c| {
                let label = c.service.trim().to_lowercase();
                !label.is_empty() && (label.contains(&wanted) || wanted.contains(&label))
            })
        {
            return found(c, MatchStep::Substring);
        }

        if self.allow_fallback {
            warn!(
                provider = %provider,
                service = %first.service,
                "no credential label matches provider, falling back to first credential"
            );
            return found(first, MatchStep::Fallback);
        }

        Resolution::NoMatch
    }
}

/// Resolve with the default cascade, fallback included.
pub fn resolve<'a>(credentials: &'a [Credential], provider: &str) -> Resolution<'a> {
    CredentialResolver::default().resolve(credentials, provider)
}
