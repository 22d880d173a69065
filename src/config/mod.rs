//! Settings and configuration module
//!
//! Provides the unified fetcher configuration with:
//! - Sensible defaults for every knob
//! - JSON loading (durations are fractional seconds)
//! - Validation before a fetcher is assembled

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::fetch::headers::HeaderProfileConfig;
use crate::modules::identity::IdentityMode;
use crate::modules::timing::{BackoffPolicy, PacingWindow};

/// Statuses retried by default. 403 is ambiguous: some origins use it for
/// "slow down", others for a permanent block. Drop it from the set to treat
/// it as fatal.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [403, 429, 500, 502, 503, 504];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid origin '{value}': {source}")]
    Origin {
        value: String,
        source: url::ParseError,
    },
    #[error("invalid block signature `{pattern}`: {source}")]
    Signature {
        pattern: String,
        source: regex::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration for [`crate::ResilientFetcher`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Origin used for warm-up. When unset, warm-up targets the origin of
    /// the URL being fetched and no warm-up runs at construction.
    pub origin: Option<String>,
    pub identity: IdentityMode,
    pub pacing: PacingWindow,
    pub max_attempts: usize,
    pub backoff: BackoffPolicy,
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    pub retryable_statuses: Vec<u16>,
    /// Extra case-insensitive regexes marking a bot-check page.
    pub block_signatures: Vec<String>,
    pub headers: HeaderProfileConfig,
    pub warmup: WarmupConfig,
    pub browser: BrowserSettings,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            origin: None,
            identity: IdentityMode::Disabled,
            pacing: PacingWindow::default(),
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            request_timeout: Duration::from_secs(30),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
            block_signatures: Vec::new(),
            headers: HeaderProfileConfig::default(),
            warmup: WarmupConfig::default(),
            browser: BrowserSettings::default(),
        }
    }
}

impl FetcherConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: FetcherConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if !self.pacing.is_ordered() {
            return Err(ConfigError::Invalid(format!(
                "pacing window inverted: {:?} > {:?}",
                self.pacing.lo, self.pacing.hi
            )));
        }
        if !self.backoff.base.is_finite() || self.backoff.base < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff base must be >= 1.0, got {}",
                self.backoff.base
            )));
        }
        if self.warmup.pause.lo > self.warmup.pause.hi {
            return Err(ConfigError::Invalid("warm-up pause window inverted".into()));
        }
        self.origin_url()?;
        Ok(())
    }

    pub fn origin_url(&self) -> Result<Option<url::Url>, ConfigError> {
        self.origin
            .as_deref()
            .map(|value| {
                url::Url::parse(value).map_err(|source| ConfigError::Origin {
                    value: value.to_string(),
                    source,
                })
            })
            .transpose()
    }
}

/// Session warm-up settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    pub enabled: bool,
    /// Well-known static resource requested after the origin root.
    pub static_path: String,
    pub pause: PacingWindow,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            static_path: "robots.txt".into(),
            pause: PacingWindow::new(Duration::from_millis(600), Duration::from_millis(1200)),
        }
    }
}

/// Browser transport settings; ignored by the HTTP transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub executable: Option<PathBuf>,
    pub headless: bool,
    #[serde(with = "duration_secs")]
    pub page_load_timeout: Duration,
    /// Upper bound on waiting for a `body` element after navigation.
    #[serde(with = "duration_secs")]
    pub body_wait: Duration,
    /// Pause after the body appears so late scripts can finish rendering.
    #[serde(with = "duration_secs")]
    pub settle: Duration,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            page_load_timeout: Duration::from_secs(45),
            body_wait: Duration::from_secs(30),
            settle: Duration::from_secs(1),
        }
    }
}

/// Reads a [`Duration`] from fractional seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, de::Error};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
