//! Browser session used to reach the review pages.
//!
//! The harvest controller only talks to [`BrowserSession`]. The Chromium
//! implementation (CDP via chromiumoxide, with stealth evasion) sits behind
//! the `browser` feature.

mod chromium;
mod config;
mod stealth;
mod user_agent;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use chromium::ChromiumSession;
pub use config::{BrowserEngineConfig, BrowserEngineType};
pub use user_agent::{random_user_agent, resolve_user_agent};

use super::endpoint::ReviewEndpointMatcher;
use super::structured::json_ld_blocks;
use crate::error::Result;

/// A response the page received on its own, captured off the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedExchange {
    pub url: String,
    pub status: u16,
    /// Request headers as the page sent them.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Result of an explicit GET issued from inside the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// What a consent pass found on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentBanner {
    Absent,
    Dismissed,
    /// Shown, but every dismiss attempt failed.
    Stuck,
}

impl ConsentBanner {
    /// Whether the page is usable after the consent pass.
    pub fn is_satisfied(self) -> bool {
        !matches!(self, ConsentBanner::Stuck)
    }
}

/// Everything the harvester needs from a live browser tab.
#[async_trait]
pub trait BrowserSession: Send {
    /// Start capturing responses whose URL matches `matcher`.
    ///
    /// Opens a fresh tab; subsequent calls apply to that tab.
    async fn observe_responses(
        &mut self,
        matcher: ReviewEndpointMatcher,
        capacity: usize,
    ) -> Result<mpsc::Receiver<ObservedExchange>>;

    /// Navigate and wait for the document to load.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Dismiss consent prompts. False if the page cannot be used.
    async fn ensure_consent(&mut self) -> Result<bool>;

    async fn title(&mut self) -> Result<String>;

    /// Rendered HTML of the current document.
    async fn content(&mut self) -> Result<String>;

    /// Raw JSON-LD script blocks of the current document.
    async fn structured_data_blocks(&mut self) -> Result<Vec<String>> {
        let html = self.content().await?;
        Ok(json_ld_blocks(&html))
    }

    /// GET `url` with the page's cookies and session.
    async fn http_get(&mut self, url: &str, headers: &[(String, String)]) -> Result<RawResponse>;

    async fn close(&mut self) {}
}

/// Wait up to `wait` for the first observed exchange that matches.
pub async fn drain_first_match(
    rx: &mut mpsc::Receiver<ObservedExchange>,
    matcher: &ReviewEndpointMatcher,
    wait: Duration,
) -> Option<ObservedExchange> {
    let first = async {
        while let Some(exchange) = rx.recv().await {
            if matcher.is_match(&exchange.url) {
                return Some(exchange);
            }
        }
        None
    };
    tokio::time::timeout(wait, first).await.ok().flatten()
}
