//! Request pacing and retry backoff.
//!
//! Both policies produce plain [`Duration`]s; the orchestrator decides when
//! to sleep on them.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::config::duration_secs;

/// Uniform polite delay applied before the first attempt of every fetch.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PacingWindow {
    #[serde(with = "duration_secs")]
    pub lo: Duration,
    #[serde(with = "duration_secs")]
    pub hi: Duration,
}

impl PacingWindow {
    pub fn new(lo: Duration, hi: Duration) -> Self {
        Self { lo, hi }
    }

    /// Window that never sleeps.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn is_ordered(&self) -> bool {
        self.lo <= self.hi
    }

    pub fn sample(&self) -> Duration {
        sample_between(self.lo, self.hi)
    }
}

impl Default for PacingWindow {
    fn default() -> Self {
        Self::new(Duration::from_millis(2500), Duration::from_millis(5000))
    }
}

/// Exponential backoff used between failed attempts:
/// `min(cap, base^attempt + U(0, jitter))`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub base: f64,
    #[serde(with = "duration_secs")]
    pub cap: Duration,
    #[serde(with = "duration_secs")]
    pub jitter: Duration,
}

impl BackoffPolicy {
    pub fn new(base: f64, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: Duration::from_secs(1),
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base.max(1.0).powi(exponent);
        let jitter = if self.jitter.is_zero() {
            0.0
        } else {
            rand::thread_rng().gen_range(0.0..self.jitter.as_secs_f64())
        };
        let secs = (raw + jitter).min(self.cap.as_secs_f64());
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else if secs.is_infinite() {
            self.cap
        } else {
            Duration::ZERO
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(1.5, Duration::from_secs(30))
    }
}

/// Uniform sample in `[lo, hi]`; collapses to `lo` when the window is empty
/// or inverted.
pub(crate) fn sample_between(lo: Duration, hi: Duration) -> Duration {
    if hi <= lo {
        return lo;
    }
    let secs = rand::thread_rng().gen_range(lo.as_secs_f64()..=hi.as_secs_f64());
    Duration::from_secs_f64(secs)
}
