//! # resilient-fetch
//!
//! Async page fetching for crawlers that talk to origins running bot
//! detection. Every fetch goes through a bounded attempt loop that paces
//! requests, classifies each response, and on failure rotates the network
//! identity, re-warms the session and backs off before trying again.
//!
//! ## Features
//!
//! - Realistic navigation headers with a validated User-Agent
//! - Soft-block detection for captcha and "are you a robot" pages
//! - Identity rotation through Tor (`SIGNAL NEWNYM`) or a proxy pool
//! - Session warm-up against the origin root and a static resource
//! - Exponential backoff with jitter and randomized pacing
//! - Persistent cookies per session
//! - Optional headless browser backend (`browser` feature)
//!
//! ## Example
//!
//! ```no_run
//! use resilient_fetch::ResilientFetcher;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut fetcher = ResilientFetcher::builder()
//!         .with_origin("https://shop.example")
//!         .build()
//!         .await?;
//!     let body = fetcher.fetch("https://shop.example/item/42", true, None).await?;
//!     println!("{} bytes", body.len());
//!     fetcher.close().await;
//!     Ok(())
//! }
//! ```

mod fetcher;

pub mod config;
pub mod fetch;
pub mod modules;

pub use crate::fetcher::{
    FetchError,
    FetchResult,
    ResilientFetcher,
    ResilientFetcherBuilder,
    ResourceError,
};

pub use crate::config::{BrowserSettings, ConfigError, FetcherConfig, WarmupConfig};

pub use crate::fetch::{
    AttemptOutcome,
    Classification,
    FetchRequest,
    HeaderProfile,
    HeaderProfileConfig,
    HeaderSet,
    HttpTransport,
    NoWarmup,
    OriginWarmup,
    ResponseClassifier,
    SessionWarmup,
    Transport,
    TransportError,
    TransportRequest,
    TransportResponse,
    WarmupContext,
};

#[cfg(feature = "browser")]
pub use crate::fetch::BrowserTransport;

pub use crate::modules::{
    BackoffPolicy,
    DisabledRotator,
    EventDispatcher,
    EventHandler,
    FetchEvent,
    Identity,
    IdentityMode,
    IdentityRotator,
    PacingWindow,
    ProxyPoolConfig,
    ProxyPoolRotator,
    TorConfig,
    TorRotator,
};

/// Version string of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
