//! Proxy-pool identity rotation with health tracking.
//!
//! Each rotation counts as a failure against the proxy in use, benches it
//! once it crosses the failure threshold, and moves on according to the
//! chosen strategy.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tokio::time::sleep;

use super::{DEFAULT_SETTLE, Identity, IdentityRotator};
use crate::config::duration_secs;
use crate::fetcher::ResourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    Sequential,
    Random,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyPoolConfig {
    pub proxies: Vec<String>,
    pub strategy: RotationStrategy,
    /// Failures before a proxy is benched.
    pub failure_threshold: u32,
    #[serde(with = "duration_secs")]
    pub ban_time: Duration,
    #[serde(with = "duration_secs")]
    pub settle: Duration,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            proxies: Vec::new(),
            strategy: RotationStrategy::Sequential,
            failure_threshold: 3,
            ban_time: Duration::from_secs(300),
            settle: DEFAULT_SETTLE,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProxyStats {
    pub failures: u64,
    pub last_failure: Option<Instant>,
}

#[derive(Debug, Clone)]
struct ProxyEntry {
    endpoint: String,
    stats: ProxyStats,
    banned_until: Option<Instant>,
}

impl ProxyEntry {
    fn is_available(&self, now: Instant) -> bool {
        self.banned_until.is_none_or(|until| now >= until)
    }
}

/// Rotates through a fixed list of proxies.
#[derive(Debug)]
pub struct ProxyPoolRotator {
    config: ProxyPoolConfig,
    proxies: Vec<ProxyEntry>,
    current: usize,
    generation: u64,
}

impl ProxyPoolRotator {
    pub fn new(config: ProxyPoolConfig) -> Result<Self, ResourceError> {
        let mut proxies: Vec<ProxyEntry> = Vec::new();
        for endpoint in &config.proxies {
            reqwest::Proxy::all(endpoint.as_str()).map_err(|source| {
                ResourceError::InvalidProxy {
                    endpoint: endpoint.clone(),
                    source,
                }
            })?;
            if proxies.iter().any(|entry| &entry.endpoint == endpoint) {
                continue;
            }
            proxies.push(ProxyEntry {
                endpoint: endpoint.clone(),
                stats: ProxyStats::default(),
                banned_until: None,
            });
        }

        if proxies.is_empty() {
            return Err(ResourceError::EmptyProxyPool);
        }

        Ok(Self {
            config,
            proxies,
            current: 0,
            generation: 0,
        })
    }

    /// Failure counters per proxy endpoint.
    pub fn stats(&self) -> HashMap<String, ProxyStats> {
        self.proxies
            .iter()
            .map(|entry| (entry.endpoint.clone(), entry.stats.clone()))
            .collect()
    }

    pub fn available(&self) -> usize {
        let now = Instant::now();
        self.proxies
            .iter()
            .filter(|entry| entry.is_available(now))
            .count()
    }

    fn report_failure(&mut self, index: usize) {
        let threshold = u64::from(self.config.failure_threshold.max(1));
        let ban_time = self.config.ban_time;
        let entry = &mut self.proxies[index];
        entry.stats.failures += 1;
        entry.stats.last_failure = Some(Instant::now());
        if entry.stats.failures % threshold == 0 {
            log::info!("benching proxy {} for {:?}", entry.endpoint, ban_time);
            entry.banned_until = Some(Instant::now() + ban_time);
        }
    }

    fn select_next(&mut self) -> usize {
        let now = Instant::now();
        let mut available: Vec<usize> = (0..self.proxies.len())
            .filter(|&idx| idx != self.current && self.proxies[idx].is_available(now))
            .collect();

        if available.is_empty() {
            if self.proxies[self.current].is_available(now) {
                return self.current;
            }
            // Everything is benched: release whichever ban expires first.
            let soonest = self
                .proxies
                .iter()
                .enumerate()
                .min_by_key(|(_, entry)| entry.banned_until.unwrap_or(now))
                .map(|(idx, _)| idx)
                .unwrap_or(self.current);
            self.proxies[soonest].banned_until = None;
            return soonest;
        }

        match self.config.strategy {
            RotationStrategy::Sequential => {
                let len = self.proxies.len();
                available.sort_by_key(|&idx| (idx + len - self.current) % len);
                available[0]
            }
            RotationStrategy::Random => available
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(self.current),
        }
    }
}

#[async_trait]
impl IdentityRotator for ProxyPoolRotator {
    fn current(&self) -> Identity {
        Identity::via_proxy(self.proxies[self.current].endpoint.clone(), self.generation)
    }

    async fn rotate(&mut self) {
        self.report_failure(self.current);
        let next = self.select_next();
        if next == self.current {
            log::warn!("no alternative proxy available, staying on {}", self.proxies[next].endpoint);
        } else {
            log::info!(
                "rotating proxy {} -> {}",
                self.proxies[self.current].endpoint,
                self.proxies[next].endpoint
            );
        }
        self.current = next;
        self.generation += 1;
        sleep(self.config.settle).await;
    }
}
