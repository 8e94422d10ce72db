//! Pass-through stream that remembers what it forwarded.
//!
//! [`CompletionStream`] hands each provider delta to the caller unchanged while
//! accumulating the full text. Exactly once, when the stream finishes, fails,
//! or is dropped early, it runs a completion hook with everything forwarded so
//! far.
//!
//! When the stream ends on its own the hook is awaited before the final
//! `None`, so whatever the hook writes is visible to anyone who has read the
//! whole stream. A dropped stream has no consumer left to wait on; its hook is
//! spawned onto the current tokio runtime instead.

use futures::Stream;
use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use crate::providers::{ProviderError, TextStream};

/// How the stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// The provider signalled the end of its response.
    Finished,
    /// The consumer dropped the stream before the provider finished.
    Disconnected,
    /// The provider failed after streaming had begun.
    Failed(ProviderError),
}

/// Text accumulated by a [`CompletionStream`] and the reason it stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub outcome: CompletionOutcome,
}

pub type OnComplete = Box<dyn FnOnce(Completion) -> BoxFuture<'static, ()> + Send>;

pub struct CompletionStream {
    upstream: TextStream,
    buffer: String,
    on_complete: Option<OnComplete>,
    finishing: Option<BoxFuture<'static, ()>>,
}

impl CompletionStream {
    pub fn new(upstream: TextStream, on_complete: OnComplete) -> Self {
        Self {
            upstream,
            buffer: String::new(),
            on_complete: Some(on_complete),
            finishing: None,
        }
    }

    fn begin_completion(&mut self, outcome: CompletionOutcome) {
        if let Some(hook) = self.on_complete.take() {
            let text = std::mem::take(&mut self.buffer);
            self.finishing = Some(hook(Completion { text, outcome }));
        }
    }
}

impl Stream for CompletionStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(finishing) = this.finishing.as_mut() {
                return match finishing.as_mut().poll(cx) {
                    Poll::Ready(()) => {
                        this.finishing = None;
                        Poll::Ready(None)
                    }
                    Poll::Pending => Poll::Pending,
                };
            }
            if this.on_complete.is_none() {
                return Poll::Ready(None);
            }

            match this.upstream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(delta))) => {
                    this.buffer.push_str(&delta);
                    return Poll::Ready(Some(delta));
                }
                Poll::Ready(Some(Err(err))) => {
                    warn!(error = %err, "provider stream failed mid-response");
                    this.begin_completion(CompletionOutcome::Failed(err));
                }
                Poll::Ready(None) => this.begin_completion(CompletionOutcome::Finished),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for CompletionStream {
    fn drop(&mut self) {
        if self.on_complete.is_some() {
            debug!(
                chars = self.buffer.chars().count(),
                "response stream dropped before completion"
            );
            self.begin_completion(CompletionOutcome::Disconnected);
        }
        let Some(finishing) = self.finishing.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(finishing);
            }
            Err(_) => warn!("no runtime available, completion hook skipped"),
        }
    }
}
