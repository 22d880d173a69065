//! Event system for the fetch loop.
//!
//! Provides hooks for logging and custom reactions at every state
//! transition of a fetch.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::fetch::types::Classification;

/// Emitted right before a physical attempt.
#[derive(Debug, Clone)]
pub struct PreRequestEvent {
    pub url: Url,
    pub attempt: usize,
    pub transport: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Emitted once an attempt has been classified.
#[derive(Debug, Clone)]
pub struct PostResponseEvent {
    pub url: Url,
    pub attempt: usize,
    pub status: Option<u16>,
    pub classification: Classification,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub url: Url,
    pub next_attempt: usize,
    pub reason: Classification,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct IdentityEvent {
    pub generation: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WarmupEvent {
    pub origin: Url,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub url: Url,
    pub attempts: usize,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum FetchEvent {
    PreRequest(PreRequestEvent),
    PostResponse(PostResponseEvent),
    Retry(RetryEvent),
    IdentityRotated(IdentityEvent),
    WarmedUp(WarmupEvent),
    Failed(FailureEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &FetchEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: FetchEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &FetchEvent) {
        match event {
            FetchEvent::PreRequest(pre) => {
                log::debug!("-> GET {} (attempt {}, {})", pre.url, pre.attempt, pre.transport);
            }
            FetchEvent::PostResponse(post) => {
                log::debug!(
                    "<- {} {} -> {} ({:.2}s)",
                    post.url,
                    post.status.map_or_else(|| "---".to_string(), |s| s.to_string()),
                    post.classification,
                    post.latency.as_secs_f64()
                );
            }
            FetchEvent::Retry(retry) => {
                log::info!(
                    "retry {} attempt {} after {:.2}s ({})",
                    retry.url,
                    retry.next_attempt,
                    retry.scheduled_after.as_secs_f64(),
                    retry.reason
                );
            }
            FetchEvent::IdentityRotated(identity) => {
                log::info!("identity rotated (generation {})", identity.generation);
            }
            FetchEvent::WarmedUp(warmup) => {
                log::info!("session re-warmed against {}", warmup.origin);
            }
            FetchEvent::Failed(failure) => {
                log::warn!(
                    "giving up on {} after {} attempt(s): {}",
                    failure.url,
                    failure.attempts,
                    failure.error
                );
            }
        }
    }
}
