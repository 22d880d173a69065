//! Chromium-backed transport for origins that insist on script execution.
//!
//! One browser process and one page are kept for the transport's lifetime,
//! so cookies and storage behave like a real session. Identity rotation is
//! not supported; pair this transport with a disabled rotator.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};

use super::{Transport, TransportError, TransportRequest, TransportResponse};
use crate::fetch::headers::HeaderSet;
use crate::config::BrowserSettings;
use crate::fetcher::ResourceError;

/// Extra headers apply to every request the page makes, subresources
/// included, so only values a browser sends on all of them are forwarded.
/// Navigation headers (`sec-fetch-*`, `accept`, `upgrade-insecure-requests`)
/// are produced by Chromium itself; the referer travels with the navigation.
const PAGE_WIDE_HEADERS: &[&str] = &["accept-language", "dnt"];

pub struct BrowserTransport {
    settings: BrowserSettings,
    browser: Option<Browser>,
    page: Option<Page>,
    handler: Option<JoinHandle<()>>,
}

impl BrowserTransport {
    /// Launches Chromium. Missing binaries and launch failures are fatal.
    pub async fn launch(settings: BrowserSettings) -> Result<Self, ResourceError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(settings.page_load_timeout);
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(ref executable) = settings.executable {
            if !executable.is_file() {
                return Err(ResourceError::BrowserLaunch(format!(
                    "browser executable not found: {}",
                    executable.display()
                )));
            }
            builder = builder.chrome_executable(executable);
        }

        let config = builder.build().map_err(ResourceError::BrowserLaunch)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| ResourceError::BrowserLaunch(err.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    log::trace!("browser handler event error: {err}");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| ResourceError::BrowserLaunch(err.to_string()))?;

        log::info!("browser transport launched (headless={})", settings.headless);

        Ok(Self {
            settings,
            browser: Some(browser),
            page: Some(page),
            handler: Some(handler),
        })
    }

    async fn apply_headers(&self, page: &Page, request: &TransportRequest) -> Result<(), TransportError> {
        if let Some(user_agent) = request.headers.get("user-agent") {
            page.execute(SetUserAgentOverrideParams::new(user_agent))
                .await
                .map_err(|err| TransportError::Network(err.to_string()))?;
        }

        page.execute(SetExtraHttpHeadersParams::new(Headers::new(
            serde_json::Value::Object(page_wide_headers(&request.headers)),
        )))
        .await
        .map_err(|err| TransportError::Network(err.to_string()))?;
        Ok(())
    }

    /// Polls for a `body` element until it shows up or `body_wait` passes.
    async fn wait_for_body(&self, page: &Page) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.settings.body_wait;
        loop {
            if page.find_element("body").await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout(self.settings.body_wait));
            }
            sleep(Duration::from_millis(250)).await;
        }
    }
}

#[async_trait]
impl Transport for BrowserTransport {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let page = self.page.as_ref().ok_or(TransportError::Closed)?;
        if request.identity.proxy().is_some() {
            log::debug!("browser transport ignores identity proxy; egress is fixed at launch");
        }

        self.apply_headers(page, request).await?;

        let mut navigation = NavigateParams::builder().url(request.url.as_str());
        if let Some(referer) = request.headers.get("referer") {
            navigation = navigation.referrer(referer);
        }
        let navigation = navigation.build().map_err(TransportError::Network)?;

        timeout(self.settings.page_load_timeout, page.goto(navigation))
            .await
            .map_err(|_| TransportError::Timeout(self.settings.page_load_timeout))?
            .map_err(|err| TransportError::Network(err.to_string()))?;

        self.wait_for_body(page).await?;
        sleep(self.settings.settle).await;

        let body = page
            .content()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;
        let url = page
            .url()
            .await
            .ok()
            .flatten()
            .and_then(|current| url::Url::parse(&current).ok())
            .unwrap_or_else(|| request.url.clone());

        // CDP does not surface the document status here; a rendered page
        // counts as 200 and is judged on its body.
        Ok(TransportResponse {
            status: 200,
            body,
            url,
        })
    }

    async fn close(&mut self) {
        self.page = None;
        if let Some(mut browser) = self.browser.take() {
            if let Err(err) = browser.close().await {
                log::warn!("browser close failed: {err}");
            }
            if let Err(err) = browser.wait().await {
                log::warn!("browser process wait failed: {err}");
            }
            log::info!("browser transport closed");
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

fn page_wide_headers(headers: &HeaderSet) -> serde_json::Map<String, serde_json::Value> {
    headers
        .iter()
        .filter(|(name, _)| PAGE_WIDE_HEADERS.contains(name))
        .map(|(name, value)| (name.to_string(), serde_json::Value::from(value)))
        .collect()
}

impl Drop for BrowserTransport {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}
