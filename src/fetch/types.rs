//! Data shared between the orchestrator, classifier and transports.

use std::fmt;

use url::Url;

/// A single logical fetch. Immutable for the duration of the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub referer: Option<Url>,
    pub rotate_on_fail: bool,
}

impl FetchRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            referer: None,
            rotate_on_fail: true,
        }
    }

    pub fn with_referer(mut self, referer: Url) -> Self {
        self.referer = Some(referer);
        self
    }

    pub fn with_rotate_on_fail(mut self, rotate: bool) -> Self {
        self.rotate_on_fail = rotate;
        self
    }
}

/// Verdict for one physical attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Success,
    /// Human-verification or interstitial page, whatever the status said.
    SoftBlock,
    RetryableError,
    FatalError,
    /// No status or body could be obtained.
    NetworkError,
}

impl Classification {
    /// Whether another attempt may follow, budget permitting.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Classification::SoftBlock
                | Classification::RetryableError
                | Classification::NetworkError
        )
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Classification::Success => "success",
            Classification::SoftBlock => "soft-block",
            Classification::RetryableError => "retryable-error",
            Classification::FatalError => "fatal-error",
            Classification::NetworkError => "network-error",
        };
        f.write_str(label)
    }
}

/// Result of one physical attempt. Never outlives the fetch loop.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub status: Option<u16>,
    pub body: String,
    pub classification: Classification,
}

impl AttemptOutcome {
    pub fn network_failure() -> Self {
        Self {
            status: None,
            body: String::new(),
            classification: Classification::NetworkError,
        }
    }
}
