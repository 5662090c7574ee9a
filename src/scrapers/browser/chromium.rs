//! Chromium (CDP) implementation of [`BrowserSession`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::config::BrowserEngineConfig;
#[cfg(feature = "browser")]
use super::config::BrowserEngineType;
use super::{BrowserSession, ObservedExchange, RawResponse};
use crate::error::{HarvestError, Result};
use crate::scrapers::endpoint::ReviewEndpointMatcher;

#[cfg(feature = "browser")]
mod imp {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use base64::Engine;
    use chromiumoxide::cdp::browser_protocol::network::{
        EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
        EventResponseReceived, GetResponseBodyParams, Headers, SetUserAgentOverrideParams,
    };
    use chromiumoxide::{Browser, BrowserConfig, Page};
    use futures::StreamExt;
    use serde_json::Value;
    use tokio::task::JoinHandle;
    use tracing::{debug, info, warn};

    use super::*;
    use crate::scrapers::browser::ConsentBanner;
    use crate::scrapers::browser::stealth::{register_stealth, STEALTH_ARGS};
    use crate::scrapers::browser::user_agent::resolve_user_agent;

    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &[&str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    pub(super) fn browser_err(context: &str, e: impl std::fmt::Display) -> HarvestError {
        HarvestError::Browser(format!("{}: {}", context, e))
    }

    /// Find Chrome executable.
    fn find_chrome() -> Result<PathBuf> {
        for path in CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        info!("Found Chrome in PATH: {}", path);
                        return Ok(PathBuf::from(path));
                    }
                }
            }
        }

        Err(HarvestError::Browser(
            "Chrome/Chromium not found. Install it or set BROWSER_URL to a running instance"
                .to_string(),
        ))
    }

    fn headers_to_vec(headers: &Headers) -> Vec<(String, String)> {
        match headers.inner() {
            Value::Object(map) => map
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (name.clone(), value)
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// In-flight request seen on the wire.
    struct Pending {
        url: String,
        headers: Vec<(String, String)>,
        status: Option<u16>,
    }

    /// Publish matching network exchanges of `page` into `tx` until the
    /// receiver goes away.
    async fn pump_network(page: Page, matcher: ReviewEndpointMatcher, tx: mpsc::Sender<ObservedExchange>) {
        let streams = tokio::try_join!(
            page.event_listener::<EventRequestWillBeSent>(),
            page.event_listener::<EventResponseReceived>(),
            page.event_listener::<EventLoadingFinished>(),
            page.event_listener::<EventLoadingFailed>(),
        );
        let (mut requests, mut responses, mut finished, mut failed) = match streams {
            Ok(streams) => streams,
            Err(e) => {
                warn!("Network observation unavailable: {}", e);
                return;
            }
        };

        let mut pending: HashMap<String, Pending> = HashMap::new();

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                Some(event) = requests.next() => {
                    if matcher.is_match(&event.request.url) {
                        pending.insert(event.request_id.inner().clone(), Pending {
                            url: event.request.url.clone(),
                            headers: headers_to_vec(&event.request.headers),
                            status: None,
                        });
                    }
                }
                Some(event) = responses.next() => {
                    if let Some(entry) = pending.get_mut(event.request_id.inner()) {
                        entry.status = u16::try_from(event.response.status).ok();
                    }
                }
                Some(event) = failed.next() => {
                    pending.remove(event.request_id.inner());
                }
                Some(event) = finished.next() => {
                    let Some(entry) = pending.remove(event.request_id.inner()) else {
                        continue;
                    };
                    let body = match page
                        .execute(GetResponseBodyParams::new(event.request_id.clone()))
                        .await
                    {
                        Ok(resp) if resp.result.base64_encoded => base64::engine::general_purpose::STANDARD
                            .decode(&resp.result.body)
                            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                            .unwrap_or_default(),
                        Ok(resp) => resp.result.body.clone(),
                        Err(e) => {
                            debug!("No body for observed {}: {}", entry.url, e);
                            String::new()
                        }
                    };
                    debug!("Observed review traffic: {} ({:?})", entry.url, entry.status);
                    let exchange = ObservedExchange {
                        url: entry.url,
                        status: entry.status.unwrap_or(0),
                        headers: entry.headers,
                        body,
                    };
                    if tx.send(exchange).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    }

    /// Script for an in-page GET carrying the page's cookies.
    pub(super) fn fetch_script(url: &str, headers: &[(String, String)]) -> String {
        let mut header_map = serde_json::Map::new();
        let mut referrer = Value::Null;
        for (name, value) in headers {
            match name.to_ascii_lowercase().as_str() {
                "referer" => referrer = Value::String(value.clone()),
                // browser-controlled, fetch() refuses them
                "origin" | "user-agent" => {}
                _ => {
                    header_map.insert(name.clone(), Value::String(value.clone()));
                }
            }
        }

        format!(
            r#"
            (async () => {{
                try {{
                    const init = {{
                        method: 'GET',
                        credentials: 'include',
                        headers: {headers}
                    }};
                    const referrer = {referrer};
                    if (referrer) init.referrer = referrer;
                    const response = await fetch({url}, init);
                    const body = await response.text();
                    return {{ status: response.status, body }};
                }} catch (e) {{
                    return {{ error: e.toString() }};
                }}
            }})()
            "#,
            url = Value::String(url.to_string()),
            headers = Value::Object(header_map),
            referrer = referrer,
        )
    }

    /// Browser session backed by a local or remote Chromium.
    pub struct ChromiumSession {
        config: BrowserEngineConfig,
        user_agent: String,
        browser: Option<Browser>,
        handler: Option<JoinHandle<()>>,
        page: Option<Page>,
    }

    impl ChromiumSession {
        pub fn new(config: BrowserEngineConfig) -> Self {
            let user_agent = resolve_user_agent(config.user_agent.as_deref());
            Self {
                config,
                user_agent,
                browser: None,
                handler: None,
                page: None,
            }
        }

        /// Launch or connect to browser if not already running.
        async fn ensure_browser(&mut self) -> Result<&Browser> {
            if self.browser.is_none() {
                let (browser, mut handler) = match self.config.remote_url.clone() {
                    Some(remote_url) => self.connect_remote(&remote_url).await?,
                    None => self.launch().await?,
                };

                self.handler = Some(tokio::spawn(async move {
                    while let Some(h) = handler.next().await {
                        if h.is_err() {
                            break;
                        }
                    }
                }));
                self.browser = Some(browser);
            }

            self.browser
                .as_ref()
                .ok_or_else(|| HarvestError::Browser("Browser not running".to_string()))
        }

        async fn launch(&self) -> Result<(Browser, chromiumoxide::Handler)> {
            info!("Launching browser (headless={})", self.config.headless);

            let chrome_path = find_chrome()?;
            let mut builder = BrowserConfig::builder()
                .chrome_executable(chrome_path)
                .request_timeout(Duration::from_secs(self.config.timeout));

            // with_head means NOT headless
            if !self.config.headless {
                builder = builder.with_head();
            }

            if let Some(ref proxy) = self.config.proxy {
                builder = builder.arg(format!("--proxy-server={}", proxy));
            }

            if self.config.engine == BrowserEngineType::Stealth {
                for arg in STEALTH_ARGS {
                    builder = builder.arg(*arg);
                }
            }

            for arg in &self.config.chrome_args {
                builder = builder.arg(arg);
            }

            let config = builder
                .build()
                .map_err(|e| browser_err("Failed to build browser config", e))?;

            Browser::launch(config)
                .await
                .map_err(|e| browser_err("Failed to launch browser", e))
        }

        /// Connect to a remote Chrome instance.
        async fn connect_remote(&self, url: &str) -> Result<(Browser, chromiumoxide::Handler)> {
            info!(
                "Connecting to remote browser at {} (timeout: {}s)",
                url, self.config.timeout
            );

            // Get WebSocket URL from the /json/version endpoint
            let http_url = url
                .replace("ws://", "http://")
                .replace("wss://", "https://");
            let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

            let client = reqwest::Client::new();
            let resp: Value = client
                .get(&version_url)
                .send()
                .await
                .map_err(|e| browser_err("Failed to connect to remote browser", e))?
                .json()
                .await
                .map_err(|e| browser_err("Failed to parse browser version info", e))?;

            let ws_url = resp
                .get("webSocketDebuggerUrl")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    HarvestError::Browser("No webSocketDebuggerUrl in response".to_string())
                })?;

            info!("Connecting to WebSocket: {}", ws_url);

            let handler_config = chromiumoxide::handler::HandlerConfig {
                request_timeout: Duration::from_secs(self.config.timeout),
                ..Default::default()
            };

            Browser::connect_with_config(ws_url, handler_config)
                .await
                .map_err(|e| browser_err("Failed to connect to remote browser", e))
        }

        /// Replace the current tab with a fresh one.
        async fn open_page(&mut self) -> Result<Page> {
            if let Some(old) = self.page.take() {
                let _ = old.close().await;
            }

            let user_agent = self.user_agent.clone();
            let stealth = self.config.engine == BrowserEngineType::Stealth;
            let browser = self.ensure_browser().await?;
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| browser_err("Failed to open tab", e))?;

            page.execute(SetUserAgentOverrideParams::new(user_agent))
                .await
                .map_err(|e| browser_err("Failed to set user agent", e))?;
            if let Err(e) = page.execute(EnableParams::default()).await {
                debug!("Network domain enable failed: {}", e);
            }
            if stealth {
                register_stealth(&page).await;
            }

            self.page = Some(page.clone());
            Ok(page)
        }

        async fn current_page(&mut self) -> Result<Page> {
            match &self.page {
                Some(page) => Ok(page.clone()),
                None => self.open_page().await,
            }
        }
    }

    #[async_trait]
    impl BrowserSession for ChromiumSession {
        async fn observe_responses(
            &mut self,
            matcher: ReviewEndpointMatcher,
            capacity: usize,
        ) -> Result<mpsc::Receiver<ObservedExchange>> {
            let page = self.open_page().await?;
            let (tx, rx) = mpsc::channel(capacity.max(1));
            tokio::spawn(pump_network(page, matcher, tx));
            Ok(rx)
        }

        async fn navigate(&mut self, url: &str) -> Result<()> {
            let page = self.current_page().await?;
            info!("Navigating to {}", url);

            let timeout = Duration::from_secs(self.config.timeout);
            match tokio::time::timeout(timeout, page.goto(url)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(browser_err("Navigation failed", e)),
                Err(_) => warn!("Timeout waiting for load of {}, continuing", url),
            }

            // let the page's own review XHRs fire
            tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
            Ok(())
        }

        async fn ensure_consent(&mut self) -> Result<bool> {
            let Some(page) = self.page.clone() else {
                return Ok(false);
            };

            let mut banner = ConsentBanner::Absent;
            for selector in &self.config.consent_selectors {
                if let Ok(element) = page.find_element(selector.as_str()).await {
                    match element.click().await {
                        Ok(_) => {
                            debug!("Clicked consent button {}", selector);
                            banner = ConsentBanner::Dismissed;
                            break;
                        }
                        Err(e) => {
                            debug!("Consent click on {} failed: {}", selector, e);
                            banner = ConsentBanner::Stuck;
                        }
                    }
                }
            }
            if banner == ConsentBanner::Stuck {
                warn!("Consent banner found but could not be dismissed");
            }
            Ok(banner.is_satisfied())
        }

        async fn title(&mut self) -> Result<String> {
            let page = self.current_page().await?;
            let title: String = page
                .evaluate("document.title")
                .await
                .map_err(|e| browser_err("Failed to read title", e))?
                .into_value()
                .unwrap_or_default();
            Ok(title)
        }

        async fn content(&mut self) -> Result<String> {
            let page = self.current_page().await?;
            page.content()
                .await
                .map_err(|e| browser_err("Failed to read page content", e))
        }

        async fn http_get(
            &mut self,
            url: &str,
            headers: &[(String, String)],
        ) -> Result<RawResponse> {
            let page = self.current_page().await?;
            let result: Value = page
                .evaluate(fetch_script(url, headers))
                .await
                .map_err(|e| browser_err("In-page fetch failed", e))?
                .into_value()
                .map_err(|e| browser_err("Failed to parse fetch result", e))?;

            if let Some(error) = result.get("error").and_then(|e| e.as_str()) {
                return Err(HarvestError::Browser(format!("JavaScript fetch failed: {}", error)));
            }

            let status = result
                .get("status")
                .and_then(|s| s.as_u64())
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(0);
            let body = result
                .get("body")
                .and_then(|b| b.as_str())
                .unwrap_or_default()
                .to_string();

            Ok(RawResponse { status, body })
        }

        async fn close(&mut self) {
            if let Some(page) = self.page.take() {
                let _ = page.close().await;
            }
            if let Some(mut browser) = self.browser.take() {
                if self.config.remote_url.is_none() {
                    let _ = browser.close().await;
                }
            }
            if let Some(handler) = self.handler.take() {
                handler.abort();
            }
        }
    }
}

#[cfg(feature = "browser")]
pub use imp::ChromiumSession;

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct ChromiumSession {
    #[allow(dead_code)]
    config: BrowserEngineConfig,
}

#[cfg(not(feature = "browser"))]
impl ChromiumSession {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self { config }
    }
}

#[cfg(not(feature = "browser"))]
fn not_compiled<T>() -> Result<T> {
    Err(HarvestError::Browser(
        "Browser support not compiled. Rebuild with: cargo build --features browser".to_string(),
    ))
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn observe_responses(
        &mut self,
        _matcher: ReviewEndpointMatcher,
        _capacity: usize,
    ) -> Result<mpsc::Receiver<ObservedExchange>> {
        not_compiled()
    }

    async fn navigate(&mut self, _url: &str) -> Result<()> {
        not_compiled()
    }

    async fn ensure_consent(&mut self) -> Result<bool> {
        not_compiled()
    }

    async fn title(&mut self) -> Result<String> {
        not_compiled()
    }

    async fn content(&mut self) -> Result<String> {
        not_compiled()
    }

    async fn http_get(&mut self, _url: &str, _headers: &[(String, String)]) -> Result<RawResponse> {
        not_compiled()
    }
}
