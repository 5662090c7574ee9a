//! Pagination controller.
//!
//! Each target runs through a small state machine:
//!
//! ```text
//! Seed -> Fetch -> Accumulate -> Decide -> Fetch ... -> Done
//!   \        \
//!    +--------+--> Fallback -> Done
//! ```
//!
//! Seed consumes an observed first page when the page itself requested one.
//! Fetch retries with backoff and falls back to JSON-LD on exhaustion.
//! Decide stops on quota, page ceiling, an empty page, or a page with
//! nothing new on it.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::browser::{drain_first_match, BrowserSession, ObservedExchange};
use super::endpoint::{
    ApiRequestTemplate, ObservedQuery, ReviewEndpointMatcher, SortOrder, TemplateOrigin,
};
use super::pacing::PacingConfig;
use super::payload::{extract_reviews_from_payload, map_review, parse_payload_body, PageFetchResult};
use super::session::{HarvestSession, Offer};
use super::site::is_blocked_title;
use super::structured::extract_fallback_reviews;
use crate::error::Result;
use crate::models::Target;
use crate::storage::ReviewSink;

/// Knobs for one harvest run.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Reviews wanted per product; `None` is unbounded.
    pub quota: Option<u64>,
    /// Page cap per product; `None` is unbounded.
    pub max_pages: Option<u32>,
    /// Requested page size.
    pub page_size: u32,
    pub sort: SortOrder,
    /// How long to wait for the page's own review request after load.
    pub observe_timeout: Duration,
    pub observe_capacity: usize,
    pub pacing: PacingConfig,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            quota: Some(20),
            max_pages: Some(5),
            page_size: 20,
            sort: SortOrder::default(),
            observe_timeout: Duration::from_secs(8),
            observe_capacity: 16,
            pacing: PacingConfig::default(),
        }
    }
}

/// Why a target stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    QuotaReached,
    PageCeiling,
    EmptyPage,
    FallbackExhausted,
    Blocked,
    ConsentNotSatisfied,
    NavigationFailed,
    AlreadySatisfied,
    NoNewReviews,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::QuotaReached => "quota reached",
            StopReason::PageCeiling => "page ceiling reached",
            StopReason::EmptyPage => "empty page",
            StopReason::FallbackExhausted => "fallback exhausted",
            StopReason::Blocked => "blocked",
            StopReason::ConsentNotSatisfied => "consent not satisfied",
            StopReason::NavigationFailed => "navigation failed",
            StopReason::AlreadySatisfied => "already satisfied",
            StopReason::NoNewReviews => "no new reviews",
        };
        f.write_str(s)
    }
}

/// Result of harvesting one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetOutcome {
    pub product_id: String,
    pub saved: u64,
    pub pages_fetched: u32,
    pub used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateOrigin>,
    pub stop: StopReason,
}

/// Result of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub targets: Vec<TargetOutcome>,
    pub total_saved: u64,
}

enum State {
    Seed,
    Fetch { page: u32 },
    Accumulate { page: u32, result: PageFetchResult },
    Decide {
        page: u32,
        result: PageFetchResult,
        fresh: usize,
    },
    Fallback,
    Done(StopReason),
}

/// Page ceiling from the configured cap and the payload's implied page count.
pub fn page_ceiling(max_pages: Option<u32>, inferred: Option<u64>) -> Option<u64> {
    match (max_pages.map(u64::from), inferred) {
        (Some(cap), Some(total)) => Some(cap.min(total)),
        (cap, total) => cap.or(total),
    }
}

struct TargetHarvest<'a, B: BrowserSession + ?Sized, S: ReviewSink> {
    browser: &'a mut B,
    session: &'a mut HarvestSession<S>,
    target: &'a Target,
    options: &'a HarvestOptions,
    matcher: ReviewEndpointMatcher,
    observed: Option<mpsc::Receiver<ObservedExchange>>,
    template: Option<ApiRequestTemplate>,
    page_size: u32,
    pages_fetched: u32,
    used_fallback: bool,
}

impl<'a, B: BrowserSession + ?Sized, S: ReviewSink> TargetHarvest<'a, B, S> {
    fn pid(&self) -> &str {
        &self.target.product_id
    }

    async fn run(mut self) -> Result<TargetOutcome> {
        let mut state = match self.preflight().await {
            Some(stop) => State::Done(stop),
            None => State::Seed,
        };

        loop {
            state = match state {
                State::Seed => self.seed().await,
                State::Fetch { page } => self.fetch(page).await,
                State::Accumulate { page, result } => self.accumulate(page, result)?,
                State::Decide {
                    page,
                    result,
                    fresh,
                } => self.decide(page, &result, fresh).await,
                State::Fallback => self.fallback().await?,
                State::Done(stop) => return Ok(self.finish(stop)),
            };
        }
    }

    /// Navigation, consent and block checks. `Some` ends the target.
    async fn preflight(&mut self) -> Option<StopReason> {
        let pid = self.target.product_id.clone();

        if self.session.quota_reached(&pid, self.options.quota) {
            info!(
                "[{}] Already saved {} reviews, skipping",
                pid,
                self.session.saved_for(&pid)
            );
            return Some(StopReason::AlreadySatisfied);
        }

        match self
            .browser
            .observe_responses(self.matcher.clone(), self.options.observe_capacity)
            .await
        {
            Ok(rx) => self.observed = Some(rx),
            Err(e) => warn!("[{}] Network observation unavailable: {}", pid, e),
        }

        let attempts = self.options.pacing.retry.max_attempts.max(1);
        let mut attempt = 1;
        while let Err(e) = self.browser.navigate(&self.target.seed_url).await {
            warn!(
                "[{}] Failed to load {}: {}. Retry {}/{}",
                pid, self.target.seed_url, e, attempt, attempts
            );
            if attempt >= attempts {
                return Some(StopReason::NavigationFailed);
            }
            self.options.pacing.wait_before_retry(attempt).await;
            attempt += 1;
        }

        match self.browser.ensure_consent().await {
            Ok(true) => {}
            Ok(false) => {
                warn!("[{}] Consent precondition not satisfied", pid);
                return Some(StopReason::ConsentNotSatisfied);
            }
            Err(e) => {
                warn!("[{}] Consent check failed: {}", pid, e);
                return Some(StopReason::ConsentNotSatisfied);
            }
        }

        let title = self.browser.title().await.unwrap_or_default();
        if !title.is_empty() {
            info!("[{}] Page title: {}", pid, title);
        }
        if is_blocked_title(&title) {
            let label = format!("blocked-{}", pid);
            if !self.session.has_diagnostic(&label) {
                let html = self.browser.content().await.unwrap_or_default();
                self.session.save_diagnostic(&label, &html);
            }
            warn!("[{}] Blocked page detected (title {:?})", pid, title);
            return Some(StopReason::Blocked);
        }

        None
    }

    /// Observed response for this target's first page, if usable as-is.
    fn seeded_page(&mut self, exchange: &ObservedExchange) -> Option<PageFetchResult> {
        if !(200..300).contains(&exchange.status) {
            return None;
        }
        let payload = parse_payload_body(&exchange.body)?;
        let query = ObservedQuery::parse(&exchange.url)?;

        let same_target = match &query.content_id {
            Some(id) => id == self.pid(),
            None => exchange.url.contains(self.pid()),
        };
        if !same_target || !query.is_first_page() {
            return None;
        }

        let result = extract_reviews_from_payload(&payload);
        let size = query.size.filter(|s| *s > 0).or_else(|| {
            result
                .page_size
                .filter(|s| *s > 0)
                .and_then(|s| u32::try_from(s).ok())
        });
        if let Some(size) = size {
            self.page_size = size;
        }
        Some(result)
    }

    async fn seed(&mut self) -> State {
        let exchange = match self.observed.as_mut() {
            Some(rx) => drain_first_match(rx, &self.matcher, self.options.observe_timeout).await,
            None => None,
        };
        // dropping the receiver stops the network pump
        self.observed = None;

        if let Some(ex) = &exchange {
            self.template = ApiRequestTemplate::from_observed(
                &ex.url,
                &ex.headers,
                self.target,
                self.options.sort,
            );
            if self.template.is_some() {
                info!("[{}] Using observed API request: {}", self.pid(), ex.url);
            }
        }
        if self.template.is_none() {
            self.template = ApiRequestTemplate::synthesize(self.target, self.options.sort);
        }
        if self.template.is_none() {
            warn!("[{}] No usable API template", self.pid());
            return State::Fallback;
        }

        if let Some(ex) = exchange {
            if let Some(result) = self.seeded_page(&ex) {
                info!(
                    "[{}] Using observed response as page 1 ({} comments)",
                    self.pid(),
                    result.comments.len()
                );
                self.pages_fetched += 1;
                return State::Accumulate { page: 1, result };
            }
        }

        State::Fetch { page: 1 }
    }

    async fn fetch(&mut self, page: u32) -> State {
        let Some(template) = &self.template else {
            return State::Fallback;
        };
        let pid = &self.target.product_id;
        let pacing = &self.options.pacing;
        let attempts = pacing.retry.max_attempts.max(1);
        let url = template.page_url(page, self.page_size);

        info!("[{}] Fetching page {} from API: {}", pid, page, url);

        for attempt in 1..=attempts {
            match self.browser.http_get(&url, template.headers()).await {
                Ok(resp) if resp.is_success() => match parse_payload_body(&resp.body) {
                    Some(payload) => {
                        self.pages_fetched += 1;
                        return State::Accumulate {
                            page,
                            result: extract_reviews_from_payload(&payload),
                        };
                    }
                    None => warn!(
                        "[{}] Non-JSON response (status {}) for page {}. Retry {}/{}",
                        pid, resp.status, page, attempt, attempts
                    ),
                },
                Ok(resp) => warn!(
                    "[{}] HTTP {} for page {}. Retry {}/{}",
                    pid, resp.status, page, attempt, attempts
                ),
                Err(e) => warn!(
                    "[{}] Request for page {} failed: {}. Retry {}/{}",
                    pid, page, e, attempt, attempts
                ),
            }

            if attempt < attempts {
                pacing.wait_before_retry(attempt).await;
            }
        }

        warn!("[{}] Failed to fetch JSON for page {}", pid, page);
        State::Fallback
    }

    fn accumulate(&mut self, page: u32, result: PageFetchResult) -> Result<State> {
        let quota = self.options.quota;
        let mut emitted = 0usize;

        for raw in &result.comments {
            if self.session.quota_reached(&self.target.product_id, quota) {
                break;
            }
            let Some(review) = map_review(raw, self.target) else {
                continue;
            };
            if self.session.offer(&review, quota)? == Offer::Emitted {
                emitted += 1;
            }
        }

        info!(
            "[{}] Page {}: {} comments, {} saved (total {})",
            self.pid(),
            page,
            result.comments.len(),
            emitted,
            self.session.saved_for(self.pid())
        );
        Ok(State::Decide {
            page,
            result,
            fresh: emitted,
        })
    }

    async fn decide(&mut self, page: u32, result: &PageFetchResult, fresh: usize) -> State {
        if result.comments.is_empty() {
            info!("[{}] No reviews on page {}", self.pid(), page);
            return State::Done(StopReason::EmptyPage);
        }
        if self
            .session
            .quota_reached(&self.target.product_id, self.options.quota)
        {
            return State::Done(StopReason::QuotaReached);
        }
        if fresh == 0 {
            info!("[{}] Page {} had nothing new, stopping", self.pid(), page);
            return State::Done(StopReason::NoNewReviews);
        }

        let inferred = result.inferred_total_pages(self.page_size);
        let ceiling = page_ceiling(self.options.max_pages, inferred);
        let next = page + 1;
        if ceiling.is_some_and(|c| u64::from(next) > c) {
            debug!("[{}] Page ceiling {:?} reached", self.pid(), ceiling);
            return State::Done(StopReason::PageCeiling);
        }

        self.options.pacing.wait_between_pages().await;
        State::Fetch { page: next }
    }

    async fn fallback(&mut self) -> Result<State> {
        if self.used_fallback {
            return Ok(State::Done(StopReason::FallbackExhausted));
        }
        self.used_fallback = true;
        let pid = self.target.product_id.clone();

        let label = format!("api-failure-{}", pid);
        if !self.session.has_diagnostic(&label) {
            let html = self.browser.content().await.unwrap_or_default();
            self.session.save_diagnostic(&label, &html);
        }

        let blocks = match self.browser.structured_data_blocks().await {
            Ok(blocks) => blocks,
            Err(e) => {
                debug!("[{}] Could not read JSON-LD: {}", pid, e);
                Vec::new()
            }
        };
        let reviews = extract_fallback_reviews(&blocks, self.target);
        if reviews.is_empty() {
            warn!("[{}] No JSON-LD reviews available as fallback", pid);
        } else {
            info!("[{}] Extracted {} JSON-LD reviews as fallback", pid, reviews.len());
        }

        for review in &reviews {
            if self.session.offer(review, self.options.quota)? == Offer::QuotaReached {
                break;
            }
        }

        Ok(State::Done(StopReason::FallbackExhausted))
    }

    fn finish(self, stop: StopReason) -> TargetOutcome {
        let saved = self.session.saved_for(&self.target.product_id);
        info!(
            "[{}] Done: {} ({} saved, {} pages)",
            self.target.product_id, stop, saved, self.pages_fetched
        );
        TargetOutcome {
            product_id: self.target.product_id.clone(),
            saved,
            pages_fetched: self.pages_fetched,
            used_fallback: self.used_fallback,
            template: self.template.as_ref().map(|t| t.origin()),
            stop,
        }
    }
}

/// Harvest one target.
///
/// Only sink failures are errors; everything else ends in a [`StopReason`].
pub async fn harvest_target<B, S>(
    browser: &mut B,
    session: &mut HarvestSession<S>,
    target: &Target,
    options: &HarvestOptions,
) -> Result<TargetOutcome>
where
    B: BrowserSession + ?Sized,
    S: ReviewSink,
{
    TargetHarvest {
        browser,
        session,
        target,
        options,
        matcher: ReviewEndpointMatcher::new(),
        observed: None,
        template: None,
        page_size: options.page_size.max(1),
        pages_fetched: 0,
        used_fallback: false,
    }
    .run()
    .await
}

/// Harvest every target in order.
pub async fn run_harvest<B, S>(
    browser: &mut B,
    session: &mut HarvestSession<S>,
    targets: &[Target],
    options: &HarvestOptions,
) -> Result<RunSummary>
where
    B: BrowserSession + ?Sized,
    S: ReviewSink,
{
    info!("Starting harvest for {} product(s)", targets.len());

    let mut outcomes = Vec::with_capacity(targets.len());
    for target in targets {
        info!(
            "[{}] Starting (seed {}, already saved {})",
            target.product_id,
            target.seed_url,
            session.saved_for(&target.product_id)
        );
        outcomes.push(harvest_target(browser, session, target, options).await?);
    }
    session.flush()?;

    let total_saved = session.total_saved();
    info!("Harvest completed. Total reviews saved: {}", total_saved);
    if total_saved == 0 {
        warn!("No reviews were saved. Check that the product ids are valid and have reviews");
    }

    Ok(RunSummary {
        targets: outcomes,
        total_saved,
    })
}
