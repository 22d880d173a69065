//! Response classification.
//!
//! Body signatures are checked before the status code: bot-check pages are
//! routinely served with a 200.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use super::types::Classification;
use crate::config::{ConfigError, DEFAULT_RETRYABLE_STATUSES};

/// Phrases that only appear on human-verification interstitials.
const DEFAULT_SIGNATURES: &[&str] = &[
    r"Robot Check",
    r"not a robot",
    r"captcha",
    r"enter the characters you see",
    r"verify you are (a )?human",
    r"are you a human",
];

static DEFAULT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    DEFAULT_SIGNATURES
        .iter()
        .map(|pattern| {
            build_regex(pattern)
                .unwrap_or_else(|err| panic!("invalid bot-check signature `{pattern}`: {err}"))
        })
        .collect()
});

/// Assigns a [`Classification`] to a `(status, body)` pair.
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    signatures: Vec<Regex>,
    retryable: BTreeSet<u16>,
}

impl Default for ResponseClassifier {
    fn default() -> Self {
        Self {
            signatures: DEFAULT_PATTERNS.clone(),
            retryable: DEFAULT_RETRYABLE_STATUSES.into_iter().collect(),
        }
    }
}

impl ResponseClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the retryable status set.
    pub fn with_retryable_statuses<I>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.retryable = statuses.into_iter().collect();
        self
    }

    /// Adds case-insensitive signatures on top of the built-in ones.
    pub fn with_signatures<I, S>(mut self, patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let regex = build_regex(pattern).map_err(|source| ConfigError::Signature {
                pattern: pattern.to_string(),
                source,
            })?;
            self.signatures.push(regex);
        }
        Ok(self)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable.contains(&status)
    }

    pub fn is_bot_check(&self, body: &str) -> bool {
        self.signatures.iter().any(|regex| regex.is_match(body))
    }

    pub fn classify(&self, status: u16, body: &str) -> Classification {
        if self.is_bot_check(body) {
            Classification::SoftBlock
        } else if self.is_retryable_status(status) {
            Classification::RetryableError
        } else if status >= 400 {
            Classification::FatalError
        } else {
            Classification::Success
        }
    }
}

fn build_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
}
