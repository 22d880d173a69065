//! High level fetch orchestration.
//!
//! Wires together header generation, the transport, response classification,
//! identity rotation and session warm-up into a bounded
//! attempt / rotate / re-warm / back-off loop that turns a URL into page
//! content or a typed terminal failure.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::time::sleep;
use url::Url;

use crate::config::{BrowserSettings, ConfigError, FetcherConfig};
use crate::fetch::classifier::ResponseClassifier;
use crate::fetch::headers::{HeaderError, HeaderProfile, HeaderProfileConfig, origin_root};
#[cfg(feature = "browser")]
use crate::fetch::transport::BrowserTransport;
use crate::fetch::transport::{HttpTransport, Transport, TransportRequest};
use crate::fetch::types::{AttemptOutcome, Classification, FetchRequest};
use crate::fetch::warmup::{NoWarmup, OriginWarmup, SessionWarmup, WarmupContext};
use crate::modules::events::{
    EventDispatcher, EventHandler, FailureEvent, FetchEvent, IdentityEvent, LoggingHandler,
    PostResponseEvent, PreRequestEvent, RetryEvent, WarmupEvent,
};
use crate::modules::identity::tor::TorControlError;
use crate::modules::identity::{
    DisabledRotator, IdentityMode, IdentityRotator, ProxyPoolRotator, TorRotator,
};
use crate::modules::timing::{BackoffPolicy, PacingWindow};

/// Result alias used across the orchestration layer.
pub type FetchResult<T> = Result<T, FetchError>;

/// Missing or broken prerequisites. Raised while building a fetcher, never
/// per request.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("tor control port {addr} unavailable: {source}")]
    TorControl {
        addr: String,
        source: TorControlError,
    },
    #[error("proxy pool is empty")]
    EmptyProxyPool,
    #[error("invalid proxy endpoint {endpoint}: {source}")]
    InvalidProxy {
        endpoint: String,
        source: reqwest::Error,
    },
    #[error("http client construction failed: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("browser launch failed: {0}")]
    BrowserLaunch(String),
}

/// Terminal failure surfaced by [`ResilientFetcher::fetch`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network failure fetching {url} after {attempts} attempt(s): {message}")]
    Network {
        url: Url,
        attempts: usize,
        /// Status seen on an earlier attempt, if any attempt got that far.
        last_status: Option<u16>,
        message: String,
    },
    #[error("HTTP {status} fetching {url} after {attempts} attempt(s)")]
    RetryableHttp {
        url: Url,
        status: u16,
        attempts: usize,
    },
    #[error("bot-detection page returned for {url} after {attempts} attempt(s)")]
    SoftBlock {
        url: Url,
        status: u16,
        attempts: usize,
    },
    #[error("HTTP {status} fetching {url}")]
    FatalHttp {
        url: Url,
        status: u16,
        attempts: usize,
    },
    #[error("resource unavailable: {0}")]
    Resource(#[from] ResourceError),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error("fetcher has been closed")]
    Closed,
}

impl FetchError {
    /// True when the origin answered with a bot-check page. Crawls usually
    /// want to stop rather than keep hammering.
    pub fn is_soft_block(&self) -> bool {
        matches!(self, FetchError::SoftBlock { .. })
    }

    /// Last observed HTTP status, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Network { last_status, .. } => *last_status,
            FetchError::RetryableHttp { status, .. }
            | FetchError::SoftBlock { status, .. }
            | FetchError::FatalHttp { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Physical attempts made before giving up.
    pub fn attempts(&self) -> Option<usize> {
        match self {
            FetchError::Network { attempts, .. }
            | FetchError::RetryableHttp { attempts, .. }
            | FetchError::SoftBlock { attempts, .. }
            | FetchError::FatalHttp { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

/// Fluent builder for [`ResilientFetcher`].
pub struct ResilientFetcherBuilder {
    config: FetcherConfig,
    transport: Option<Box<dyn Transport>>,
    rotator: Option<Box<dyn IdentityRotator>>,
    warmup: Option<Box<dyn SessionWarmup>>,
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl ResilientFetcherBuilder {
    pub fn new() -> Self {
        Self {
            config: FetcherConfig::default(),
            transport: None,
            rotator: None,
            warmup: None,
            handlers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: FetcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.config.origin = Some(origin.into());
        self
    }

    pub fn with_identity_mode(mut self, mode: IdentityMode) -> Self {
        self.config.identity = mode;
        self
    }

    pub fn with_pacing(mut self, pacing: PacingWindow) -> Self {
        self.config.pacing = pacing;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.config.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.config.backoff = backoff;
        self
    }

    pub fn with_request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn with_retryable_statuses<I>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.config.retryable_statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_block_signatures<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .block_signatures
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn with_header_profile(mut self, profile: HeaderProfileConfig) -> Self {
        self.config.headers = profile;
        self
    }

    pub fn with_browser_settings(mut self, settings: BrowserSettings) -> Self {
        self.config.browser = settings;
        self
    }

    pub fn disable_warmup(mut self) -> Self {
        self.config.warmup.enabled = false;
        self
    }

    /// Replaces the default HTTP transport.
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the rotator derived from [`IdentityMode`].
    pub fn with_identity_rotator(mut self, rotator: Box<dyn IdentityRotator>) -> Self {
        self.rotator = Some(rotator);
        self
    }

    pub fn with_warmup(mut self, warmup: Box<dyn SessionWarmup>) -> Self {
        self.warmup = Some(warmup);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Assembles the fetcher and, when an origin is configured, warms the
    /// session before returning.
    pub async fn build(self) -> FetchResult<ResilientFetcher> {
        let config = self.config;
        config.validate()?;

        let headers = HeaderProfile::new(config.headers.clone())?;
        let classifier = ResponseClassifier::new()
            .with_retryable_statuses(config.retryable_statuses.iter().copied())
            .with_signatures(&config.block_signatures)?;
        let origin = config.origin_url()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Box::new(HttpTransport::new(config.request_timeout)?),
        };
        let rotator = match self.rotator {
            Some(rotator) => rotator,
            None => build_rotator(&config.identity).await?,
        };
        let warmup: Box<dyn SessionWarmup> = match self.warmup {
            Some(warmup) => warmup,
            None if config.warmup.enabled => Box::new(OriginWarmup::new(
                config.warmup.static_path.clone(),
                config.warmup.pause,
            )),
            None => Box::new(NoWarmup),
        };

        let mut events = EventDispatcher::new();
        events.register_handler(Arc::new(LoggingHandler));
        for handler in self.handlers {
            events.register_handler(handler);
        }

        let mut fetcher = ResilientFetcher {
            config,
            headers,
            classifier,
            origin,
            transport,
            rotator,
            warmup,
            events,
            closed: false,
        };

        if let Some(origin) = fetcher.origin.clone() {
            fetcher.warm(&origin).await;
        }

        Ok(fetcher)
    }

    /// Like [`build`](Self::build) but backed by a real browser. Identity
    /// rotation is unavailable for this backend, so the rotator is always
    /// disabled.
    #[cfg(feature = "browser")]
    pub async fn build_browser(mut self) -> FetchResult<ResilientFetcher> {
        if !matches!(self.config.identity, IdentityMode::Disabled) || self.rotator.is_some() {
            log::warn!("browser transport does not rotate identities; rotation disabled");
        }
        self.config.validate()?;
        let transport = BrowserTransport::launch(self.config.browser.clone()).await?;
        self.transport = Some(Box::new(transport));
        self.rotator = Some(Box::new(DisabledRotator));
        self.build().await
    }
}

impl Default for ResilientFetcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn build_rotator(mode: &IdentityMode) -> FetchResult<Box<dyn IdentityRotator>> {
    Ok(match mode {
        IdentityMode::Disabled => Box::new(DisabledRotator),
        IdentityMode::Tor(config) => Box::new(TorRotator::connect(config.clone()).await?),
        IdentityMode::ProxyPool(config) => Box::new(ProxyPoolRotator::new(config.clone())?),
    })
}

/// Single-flight resilient fetcher.
///
/// Owns one session (cookie jar and connection pool, or one browser) and one
/// identity. `fetch` takes `&mut self`: give each concurrent worker its own
/// fetcher instead of sharing one. Dropping a `fetch` future cancels the
/// in-flight request and any pending delay.
pub struct ResilientFetcher {
    config: FetcherConfig,
    headers: HeaderProfile,
    classifier: ResponseClassifier,
    origin: Option<Url>,
    transport: Box<dyn Transport>,
    rotator: Box<dyn IdentityRotator>,
    warmup: Box<dyn SessionWarmup>,
    events: EventDispatcher,
    closed: bool,
}

impl ResilientFetcher {
    /// Construct a fetcher with default configuration.
    pub async fn new() -> FetchResult<Self> {
        Self::builder().build().await
    }

    /// Obtain a builder to customise the fetcher instance.
    pub fn builder() -> ResilientFetcherBuilder {
        ResilientFetcherBuilder::new()
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Fetches `url` and returns the raw page content.
    pub async fn fetch(
        &mut self,
        url: &str,
        rotate_on_fail: bool,
        referer: Option<&str>,
    ) -> FetchResult<String> {
        let mut request = FetchRequest::new(Url::parse(url)?).with_rotate_on_fail(rotate_on_fail);
        if let Some(referer) = referer {
            request = request.with_referer(Url::parse(referer)?);
        }
        self.fetch_request(&request).await
    }

    /// Runs the attempt loop for a prepared request.
    pub async fn fetch_request(&mut self, request: &FetchRequest) -> FetchResult<String> {
        if self.closed {
            return Err(FetchError::Closed);
        }

        sleep(self.config.pacing.sample()).await;

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_status: Option<u16> = None;
        let mut last_error = String::new();
        let mut attempt = 0usize;

        loop {
            attempt += 1;

            let outcome = self.attempt(request, attempt, &mut last_error).await;
            if outcome.status.is_some() {
                last_status = outcome.status;
            }

            match outcome.classification {
                Classification::Success => return Ok(outcome.body),
                Classification::FatalError => {
                    return Err(self.give_up(request, attempt, &outcome, last_status, &last_error));
                }
                classification if attempt < max_attempts => {
                    self.recover(request, attempt, classification).await;
                }
                _ => {
                    return Err(self.give_up(request, attempt, &outcome, last_status, &last_error));
                }
            }
        }
    }

    /// Releases the transport. Safe to call repeatedly; never fails.
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.transport.close().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    async fn attempt(
        &self,
        request: &FetchRequest,
        attempt: usize,
        last_error: &mut String,
    ) -> AttemptOutcome {
        let transport_request = TransportRequest {
            url: request.url.clone(),
            headers: self.headers.navigation(&request.url, request.referer.as_ref()),
            identity: self.rotator.current(),
        };

        self.events.dispatch(FetchEvent::PreRequest(PreRequestEvent {
            url: request.url.clone(),
            attempt,
            transport: self.transport.name(),
            timestamp: chrono::Utc::now(),
        }));

        let started = Instant::now();
        let outcome = match self.transport.send(&transport_request).await {
            Ok(response) => AttemptOutcome {
                status: Some(response.status),
                classification: self.classifier.classify(response.status, &response.body),
                body: response.body,
            },
            Err(err) => {
                *last_error = err.to_string();
                AttemptOutcome::network_failure()
            }
        };

        self.events.dispatch(FetchEvent::PostResponse(PostResponseEvent {
            url: request.url.clone(),
            attempt,
            status: outcome.status,
            classification: outcome.classification,
            latency: started.elapsed(),
            timestamp: chrono::Utc::now(),
        }));

        outcome
    }

    /// Rotate (if asked), re-warm, then back off before the next attempt.
    async fn recover(&mut self, request: &FetchRequest, attempt: usize, reason: Classification) {
        if request.rotate_on_fail {
            self.rotator.rotate().await;
            self.events
                .dispatch(FetchEvent::IdentityRotated(IdentityEvent {
                    generation: self.rotator.current().generation(),
                    timestamp: chrono::Utc::now(),
                }));
        }

        let origin = self
            .origin
            .clone()
            .unwrap_or_else(|| origin_root(&request.url));
        self.warm(&origin).await;

        let delay = self.config.backoff.delay(attempt);
        self.events.dispatch(FetchEvent::Retry(RetryEvent {
            url: request.url.clone(),
            next_attempt: attempt + 1,
            reason,
            scheduled_after: delay,
            timestamp: chrono::Utc::now(),
        }));
        sleep(delay).await;
    }

    async fn warm(&self, origin: &Url) {
        let identity = self.rotator.current();
        self.warmup
            .warm(WarmupContext {
                origin,
                transport: self.transport.as_ref(),
                headers: &self.headers,
                identity: &identity,
            })
            .await;
        self.events.dispatch(FetchEvent::WarmedUp(WarmupEvent {
            origin: origin.clone(),
            timestamp: chrono::Utc::now(),
        }));
    }

    fn give_up(
        &self,
        request: &FetchRequest,
        attempts: usize,
        outcome: &AttemptOutcome,
        last_status: Option<u16>,
        last_error: &str,
    ) -> FetchError {
        let url = request.url.clone();
        let error = match (outcome.classification, outcome.status) {
            (Classification::SoftBlock, Some(status)) => FetchError::SoftBlock {
                url,
                status,
                attempts,
            },
            (Classification::FatalError, Some(status)) => FetchError::FatalHttp {
                url,
                status,
                attempts,
            },
            (Classification::RetryableError, Some(status)) => FetchError::RetryableHttp {
                url,
                status,
                attempts,
            },
            _ => FetchError::Network {
                url,
                attempts,
                last_status,
                message: last_error.to_string(),
            },
        };

        self.events.dispatch(FetchEvent::Failed(FailureEvent {
            url: request.url.clone(),
            attempts,
            error: error.to_string(),
            timestamp: chrono::Utc::now(),
        }));
        error
    }
}
