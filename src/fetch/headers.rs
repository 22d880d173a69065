//! Browser-like request header generation.
//!
//! Responsibilities:
//! - Produce a fresh, internally consistent header set for every attempt.
//! - Keep the User-Agent inside an allow-list of modern browser versions,
//!   falling back to a known-good value when the draw is stale.
//! - Add navigation context (Referer, Sec-Fetch-*) relative to a target URL.

use http::header::{
    ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONNECTION, DNT, HeaderMap, HeaderName, HeaderValue,
    REFERER, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use once_cell::sync::Lazy;
use rand::Rng;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// User-Agent used whenever the generated one is outside the allow-list.
pub const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static USER_AGENT_ALLOW_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(Chrome/(8\d|9\d|1\d{2})\.|Firefox/(8\d|9\d|1\d{2})\.|Version/(1[4-9]|[2-9]\d)(\.\d+)* Safari/)",
    )
    .expect("user-agent allow-list regex is valid")
});

const SEC_FETCH_SITE: HeaderName = HeaderName::from_static("sec-fetch-site");
const SEC_FETCH_DEST: HeaderName = HeaderName::from_static("sec-fetch-dest");
const SEC_FETCH_MODE: HeaderName = HeaderName::from_static("sec-fetch-mode");
const SEC_FETCH_USER: HeaderName = HeaderName::from_static("sec-fetch-user");
const SEC_CH_UA_MOBILE: HeaderName = HeaderName::from_static("sec-ch-ua-mobile");
const SEC_CH_UA_PLATFORM: HeaderName = HeaderName::from_static("sec-ch-ua-platform");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserFamily {
    Chrome,
    Firefox,
    Safari,
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Windows,
    Mac,
    Linux,
}

impl OsFamily {
    fn ua_token(self, browser: BrowserFamily) -> &'static str {
        match (self, browser) {
            (_, BrowserFamily::Safari) | (OsFamily::Mac, _) => "Macintosh; Intel Mac OS X 10_15_7",
            (OsFamily::Windows, _) => "Windows NT 10.0; Win64; x64",
            (OsFamily::Linux, BrowserFamily::Firefox) => "X11; Ubuntu; Linux x86_64",
            (OsFamily::Linux, _) => "X11; Linux x86_64",
        }
    }
}

/// Options controlling the generated header profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeaderProfileConfig {
    pub browser: BrowserFamily,
    pub os: OsFamily,
    /// Adds DNT, Upgrade-Insecure-Requests and client hints.
    pub include_extra_headers: bool,
    pub accept_language: String,
    pub accept_encoding: String,
}

impl Default for HeaderProfileConfig {
    fn default() -> Self {
        Self {
            browser: BrowserFamily::Chrome,
            os: OsFamily::Windows,
            include_extra_headers: true,
            accept_language: "en-US,en;q=0.9".into(),
            accept_encoding: "gzip, deflate, br".into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("invalid value for header {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Unique, case-insensitive header name to value mapping.
#[derive(Debug, Clone, Default)]
pub struct HeaderSet(HeaderMap);

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        self.0.insert(name, value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
    }

    pub fn as_header_map(&self) -> &HeaderMap {
        &self.0
    }

    pub fn into_header_map(self) -> HeaderMap {
        self.0
    }

    fn set(&mut self, name: HeaderName, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.0.insert(name, value);
            }
            Err(_) => log::debug!("skipping unrepresentable {name} header value"),
        }
    }
}

/// Generates browser-like headers. Pure apart from its internal randomness.
#[derive(Debug, Clone)]
pub struct HeaderProfile {
    browser: BrowserFamily,
    os: OsFamily,
    include_extra_headers: bool,
    accept_language: HeaderValue,
    accept_encoding: HeaderValue,
}

impl HeaderProfile {
    pub fn new(config: HeaderProfileConfig) -> Result<Self, HeaderError> {
        let accept_language = HeaderValue::from_str(&config.accept_language).map_err(|_| {
            HeaderError::InvalidValue {
                name: "accept-language",
                value: config.accept_language.clone(),
            }
        })?;
        let accept_encoding = HeaderValue::from_str(&config.accept_encoding).map_err(|_| {
            HeaderError::InvalidValue {
                name: "accept-encoding",
                value: config.accept_encoding.clone(),
            }
        })?;

        Ok(Self {
            browser: config.browser,
            os: config.os,
            include_extra_headers: config.include_extra_headers,
            accept_language,
            accept_encoding,
        })
    }

    /// Fresh base header set with a validated User-Agent.
    pub fn generate(&self) -> HeaderSet {
        self.assemble(self.random_user_agent())
    }

    /// Builds the base set around `candidate`. Accept and client hints
    /// follow the browser family of the User-Agent actually sent, which is
    /// Chrome whenever the candidate was replaced by the fallback.
    fn assemble(&self, candidate: String) -> HeaderSet {
        let (user_agent, family) = if is_allowed_user_agent(&candidate) {
            (candidate, self.browser)
        } else {
            log::debug!("stale user agent replaced by fallback: {candidate}");
            (FALLBACK_USER_AGENT.to_string(), BrowserFamily::Chrome)
        };
        let mut headers = HeaderSet::new();

        headers.set(USER_AGENT, &user_agent);
        headers.insert(ACCEPT, HeaderValue::from_static(accept_for(family)));
        headers.insert(ACCEPT_LANGUAGE, self.accept_language.clone());
        headers.insert(ACCEPT_ENCODING, self.accept_encoding.clone());
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        if self.include_extra_headers {
            headers.insert(DNT, HeaderValue::from_static("1"));
            headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
            if user_agent.contains("Chrome/") {
                headers.insert(SEC_CH_UA_MOBILE, HeaderValue::from_static("?0"));
                headers.insert(
                    SEC_CH_UA_PLATFORM,
                    HeaderValue::from_static(platform_hint(&user_agent)),
                );
            }
        }

        headers
    }

    /// Base headers plus navigation context for a document request to
    /// `target`. Without a referer the request looks like a typed-in URL
    /// and the Referer falls back to the target's origin root.
    pub fn navigation(&self, target: &Url, referer: Option<&Url>) -> HeaderSet {
        let mut headers = self.generate();

        let site = match referer {
            Some(referer) => {
                headers.set(REFERER, referer.as_str());
                if referer.origin() == target.origin() {
                    "same-origin"
                } else {
                    "cross-site"
                }
            }
            None => {
                headers.set(REFERER, origin_root(target).as_str());
                "none"
            }
        };

        headers.insert(SEC_FETCH_SITE, HeaderValue::from_static(site));
        headers.insert(SEC_FETCH_DEST, HeaderValue::from_static("document"));
        headers.insert(SEC_FETCH_MODE, HeaderValue::from_static("navigate"));
        headers.insert(SEC_FETCH_USER, HeaderValue::from_static("?1"));
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
        headers
    }

    /// Draws a UA for the configured family. Version ranges reach back to
    /// releases the allow-list rejects.
    fn random_user_agent(&self) -> String {
        let mut rng = rand::thread_rng();
        let os = self.os.ua_token(self.browser);
        match self.browser {
            BrowserFamily::Chrome | BrowserFamily::Edge => {
                let major: u32 = rng.gen_range(70..=131);
                let build: u32 = rng.gen_range(3000..=6800);
                let patch: u32 = rng.gen_range(0..=250);
                let chrome = format!(
                    "Mozilla/5.0 ({os}) AppleWebKit/537.36 (KHTML, like Gecko) \
                     Chrome/{major}.0.{build}.{patch} Safari/537.36"
                );
                if self.browser == BrowserFamily::Edge {
                    format!("{chrome} Edg/{major}.0.{build}.{patch}")
                } else {
                    chrome
                }
            }
            BrowserFamily::Firefox => {
                let major: u32 = rng.gen_range(70..=133);
                format!("Mozilla/5.0 ({os}; rv:{major}.0) Gecko/20100101 Firefox/{major}.0")
            }
            BrowserFamily::Safari => {
                let major: u32 = rng.gen_range(12..=18);
                let minor = [0u32, 1, 2, 3, 4, 5, 6]
                    .choose(&mut rng)
                    .copied()
                    .unwrap_or(0);
                format!(
                    "Mozilla/5.0 ({os}) AppleWebKit/605.1.15 (KHTML, like Gecko) \
                     Version/{major}.{minor} Safari/605.1.15"
                )
            }
        }
    }
}

/// Returns `candidate` when it matches the allow-list, the fallback otherwise.
pub fn validated_user_agent(candidate: String) -> String {
    if is_allowed_user_agent(&candidate) {
        candidate
    } else {
        FALLBACK_USER_AGENT.to_string()
    }
}

pub fn is_allowed_user_agent(user_agent: &str) -> bool {
    USER_AGENT_ALLOW_LIST.is_match(user_agent)
}

/// Scheme, host and port of `url` with a `/` path.
pub fn origin_root(url: &Url) -> Url {
    let mut root = url.clone();
    root.set_path("/");
    root.set_query(None);
    root.set_fragment(None);
    let _ = root.set_username("");
    let _ = root.set_password(None);
    root
}

fn accept_for(browser: BrowserFamily) -> &'static str {
    match browser {
        BrowserFamily::Chrome | BrowserFamily::Edge => {
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,\
             image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7"
        }
        BrowserFamily::Firefox => {
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"
        }
        BrowserFamily::Safari => "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    }
}

fn platform_hint(user_agent: &str) -> &'static str {
    if user_agent.contains("Windows") {
        "\"Windows\""
    } else if user_agent.contains("Mac OS X") {
        "\"macOS\""
    } else {
        "\"Linux\""
    }
}
