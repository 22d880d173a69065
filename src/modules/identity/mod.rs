//! Network identity management.
//!
//! An [`Identity`] is the egress path outbound traffic takes. Rotators swap
//! it on demand and settle before returning; rotation failures are logged,
//! never surfaced. Construction is the only fallible step.

pub mod proxy;
pub mod tor;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

pub use proxy::{ProxyPoolConfig, ProxyPoolRotator, RotationStrategy};
pub use tor::{TorConfig, TorRotator};

/// Opaque handle to the current egress path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    proxy: Option<String>,
    generation: u64,
}

impl Identity {
    /// Direct connection, no anonymizing layer.
    pub fn direct() -> Self {
        Self::default()
    }

    pub fn via_proxy(proxy: impl Into<String>, generation: u64) -> Self {
        Self {
            proxy: Some(proxy.into()),
            generation,
        }
    }

    /// Proxy URL traffic must be routed through, if any.
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Incremented on every rotation.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Requests a fresh identity on demand.
///
/// `rotate` never fails: when rotation is impossible it logs and returns.
/// Implementations are not internally rate limited; callers rotate at most
/// once per attempt and must serialize access.
#[async_trait]
pub trait IdentityRotator: Send + Sync {
    fn current(&self) -> Identity;

    async fn rotate(&mut self);
}

/// Anonymizing mode off: a no-op that never sleeps.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRotator;

#[async_trait]
impl IdentityRotator for DisabledRotator {
    fn current(&self) -> Identity {
        Identity::direct()
    }

    async fn rotate(&mut self) {
        log::debug!("identity rotation requested but anonymizing mode is disabled");
    }
}

/// Which rotator the fetcher builds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum IdentityMode {
    #[default]
    Disabled,
    Tor(TorConfig),
    ProxyPool(ProxyPoolConfig),
}

/// Post-rotation pause applied by the built-in rotators.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(3);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_rotator_keeps_direct_identity() {
        let mut rotator = DisabledRotator;
        rotator.rotate().await;
        assert_eq!(rotator.current(), Identity::direct());
        assert!(rotator.current().proxy().is_none());
    }

    #[test]
    fn identity_mode_parses_tagged_json() {
        let mode: IdentityMode = serde_json::from_str(r#"{ "mode": "disabled" }"#).unwrap();
        assert!(matches!(mode, IdentityMode::Disabled));

        let mode: IdentityMode = serde_json::from_str(
            r#"{ "mode": "proxy_pool", "proxies": ["http://10.0.0.1:3128"], "strategy": "random" }"#,
        )
        .unwrap();
        match mode {
            IdentityMode::ProxyPool(config) => {
                assert_eq!(config.proxies.len(), 1);
                assert_eq!(config.strategy, RotationStrategy::Random);
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }
}
