//! Session warm-up.
//!
//! Before real traffic (and after every failure) the session visits the
//! origin root and a static resource, the way a person landing on the site
//! would, so cookies and baseline trust signals exist. Warm-up is
//! best-effort: it returns nothing and swallows every failure.

use async_trait::async_trait;
use url::Url;

use super::headers::{HeaderProfile, origin_root};
use super::transport::{Transport, TransportRequest};
use crate::modules::identity::Identity;
use crate::modules::timing::PacingWindow;

/// Everything a warm-up needs from the orchestrator for one run.
pub struct WarmupContext<'a> {
    pub origin: &'a Url,
    pub transport: &'a dyn Transport,
    pub headers: &'a HeaderProfile,
    pub identity: &'a Identity,
}

#[async_trait]
pub trait SessionWarmup: Send + Sync {
    /// Never fails and never propagates transport errors.
    async fn warm(&self, ctx: WarmupContext<'_>);
}

/// Root page, then a well-known static path, each followed by a short pause.
#[derive(Debug, Clone)]
pub struct OriginWarmup {
    static_path: String,
    pause: PacingWindow,
}

impl OriginWarmup {
    pub fn new(static_path: impl Into<String>, pause: PacingWindow) -> Self {
        Self {
            static_path: static_path.into(),
            pause,
        }
    }

    async fn visit(&self, ctx: &WarmupContext<'_>, url: &Url, referer: Option<&Url>) {
        let request = TransportRequest {
            url: url.clone(),
            headers: ctx.headers.navigation(url, referer),
            identity: ctx.identity.clone(),
        };
        match ctx.transport.send(&request).await {
            Ok(response) => log::debug!("warm-up {} -> {}", url, response.status),
            Err(err) => log::debug!("warm-up {} failed (ignored): {err}", url),
        }
        tokio::time::sleep(self.pause.sample()).await;
    }
}

impl Default for OriginWarmup {
    fn default() -> Self {
        let defaults = crate::config::WarmupConfig::default();
        Self::new(defaults.static_path, defaults.pause)
    }
}

#[async_trait]
impl SessionWarmup for OriginWarmup {
    async fn warm(&self, ctx: WarmupContext<'_>) {
        let root = origin_root(ctx.origin);
        self.visit(&ctx, &root, None).await;

        match root.join(self.static_path.trim_start_matches('/')) {
            Ok(resource) => self.visit(&ctx, &resource, Some(&root)).await,
            Err(err) => log::debug!("warm-up static path {:?} unusable: {err}", self.static_path),
        }
        log::info!("session warmed up against {root}");
    }
}

/// Used when warm-up is disabled in configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWarmup;

#[async_trait]
impl SessionWarmup for NoWarmup {
    async fn warm(&self, _ctx: WarmupContext<'_>) {}
}
