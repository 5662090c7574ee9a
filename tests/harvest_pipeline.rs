//! End-to-end harvest runs against a scripted browser session.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use url::Url;

use trendyol_reviews::error::{HarvestError, Result};
use trendyol_reviews::models::Target;
use trendyol_reviews::scrapers::browser::{
    BrowserSession, ConsentBanner, ObservedExchange, RawResponse,
};
use trendyol_reviews::scrapers::endpoint::{ReviewEndpointMatcher, TemplateOrigin};
use trendyol_reviews::scrapers::{
    harvest_target, run_harvest, HarvestOptions, HarvestSession, PacingConfig, StopReason,
};
use trendyol_reviews::storage::{DiagnosticStore, JsonlSink, MemorySink};

const API: &str = "https://apigw.trendyol.com/discovery-web-productgw-service/api/review/comments";

type Responder = Box<dyn FnMut(&str) -> RawResponse + Send>;

/// Browser double: replays observed traffic and answers GETs from a closure.
struct ScriptedBrowser {
    observed: Vec<ObservedExchange>,
    respond: Responder,
    title: String,
    html: String,
    consent: ConsentBanner,
    unreachable: HashSet<String>,
    /// Navigation failures left before a URL loads.
    flaky: HashMap<String, u32>,
    requests: Vec<String>,
    navigations: Vec<String>,
}

impl ScriptedBrowser {
    fn new(respond: impl FnMut(&str) -> RawResponse + Send + 'static) -> Self {
        Self {
            observed: Vec::new(),
            respond: Box::new(respond),
            title: "Product reviews".to_string(),
            html: "<html><body>reviews</body></html>".to_string(),
            consent: ConsentBanner::Absent,
            unreachable: HashSet::new(),
            flaky: HashMap::new(),
            requests: Vec::new(),
            navigations: Vec::new(),
        }
    }
}

#[async_trait]
impl BrowserSession for ScriptedBrowser {
    async fn observe_responses(
        &mut self,
        _matcher: ReviewEndpointMatcher,
        capacity: usize,
    ) -> Result<mpsc::Receiver<ObservedExchange>> {
        let (tx, rx) = mpsc::channel(capacity.max(self.observed.len()).max(1));
        for exchange in self.observed.drain(..) {
            tx.try_send(exchange)
                .map_err(|e| HarvestError::Browser(e.to_string()))?;
        }
        Ok(rx)
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.navigations.push(url.to_string());
        if self.unreachable.contains(url) {
            return Err(HarvestError::Browser("net::ERR_CONNECTION_RESET".to_string()));
        }
        if let Some(left) = self.flaky.get_mut(url).filter(|left| **left > 0) {
            *left -= 1;
            return Err(HarvestError::Browser("net::ERR_TIMED_OUT".to_string()));
        }
        Ok(())
    }

    async fn ensure_consent(&mut self) -> Result<bool> {
        Ok(self.consent.is_satisfied())
    }

    async fn title(&mut self) -> Result<String> {
        Ok(self.title.clone())
    }

    async fn content(&mut self) -> Result<String> {
        Ok(self.html.clone())
    }

    async fn http_get(&mut self, url: &str, _headers: &[(String, String)]) -> Result<RawResponse> {
        self.requests.push(url.to_string());
        Ok((self.respond)(url))
    }
}

fn target(id: &str) -> Target {
    let page = format!("https://www.trendyol.com/brand/shirt-p-{}/reviews", id);
    Target {
        product_id: id.to_string(),
        product_url: Some(format!("https://www.trendyol.com/brand/shirt-p-{}", id)),
        review_page_url: Some(page.clone()),
        seed_url: page,
    }
}

fn options() -> HarvestOptions {
    HarvestOptions {
        quota: None,
        max_pages: None,
        page_size: 15,
        observe_timeout: Duration::from_millis(50),
        pacing: PacingConfig::immediate(),
        ..HarvestOptions::default()
    }
}

fn memory_session() -> HarvestSession<MemorySink> {
    HarvestSession::new(MemorySink::new(), DiagnosticStore::new(None))
}

fn query_param(url: &str, key: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

fn page_of(url: &str) -> u32 {
    query_param(url, "page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(0)
}

fn comments(ids: impl IntoIterator<Item = u32>) -> Vec<Value> {
    ids.into_iter()
        .map(|id| json!({"id": id, "rate": 5, "comment": format!("review {}", id)}))
        .collect()
}

fn ok_json(payload: Value) -> RawResponse {
    RawResponse {
        status: 200,
        body: payload.to_string(),
    }
}

#[tokio::test]
async fn test_inferred_page_ceiling_stops_after_last_page() {
    let mut browser = ScriptedBrowser::new(|url| {
        let page = page_of(url);
        ok_json(json!({
            "result": {
                "comments": comments((0..12).map(|i| page * 100 + i)),
                "totalCount": 45,
                "size": 15
            }
        }))
    });
    let mut session = memory_session();

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &options())
        .await
        .unwrap();

    assert_eq!(outcome.stop, StopReason::PageCeiling);
    assert_eq!(outcome.pages_fetched, 3);
    assert_eq!(outcome.saved, 36);
    assert_eq!(outcome.template, Some(TemplateOrigin::Synthesized));
    assert!(!outcome.used_fallback);

    let pages: Vec<u32> = browser.requests.iter().map(|u| page_of(u)).collect();
    assert_eq!(pages, vec![1, 2, 3]);
    assert!(browser
        .requests
        .iter()
        .all(|u| query_param(u, "size").as_deref() == Some("15")));
    assert!(browser
        .requests
        .iter()
        .all(|u| query_param(u, "contentId").as_deref() == Some("123")));
}

#[tokio::test]
async fn test_empty_page_stops_immediately() {
    let mut browser = ScriptedBrowser::new(|_| {
        ok_json(json!({"result": {"comments": [], "totalCount": 45}}))
    });
    let mut session = memory_session();

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &options())
        .await
        .unwrap();

    assert_eq!(outcome.stop, StopReason::EmptyPage);
    assert_eq!(outcome.saved, 0);
    assert_eq!(browser.requests.len(), 1);
}

#[tokio::test]
async fn test_zero_counts_do_not_cap_paging() {
    let mut browser = ScriptedBrowser::new(|url| {
        let page = page_of(url);
        let ids: Vec<u32> = if page <= 3 {
            (0..5).map(|i| page * 100 + i).collect()
        } else {
            Vec::new()
        };
        ok_json(json!({"comments": comments(ids), "totalPages": 0, "totalCount": 0}))
    });
    let mut session = memory_session();

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &options())
        .await
        .unwrap();

    assert_eq!(outcome.stop, StopReason::EmptyPage);
    assert_eq!(outcome.saved, 15);
    assert_eq!(browser.requests.len(), 4);
}

#[tokio::test]
async fn test_repeated_page_stops_unbounded_run() {
    let mut browser = ScriptedBrowser::new(|_| ok_json(json!({"comments": comments([1, 2, 3])})));
    let mut session = memory_session();

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &options())
        .await
        .unwrap();

    assert_eq!(outcome.stop, StopReason::NoNewReviews);
    assert_eq!(outcome.saved, 3);
    assert_eq!(outcome.pages_fetched, 2);
    assert_eq!(browser.requests.len(), 2);
}

#[tokio::test]
async fn test_quota_stops_mid_page() {
    let mut browser = ScriptedBrowser::new(|url| {
        ok_json(json!({"comments": comments((0..12).map(|i| page_of(url) * 100 + i))}))
    });
    let mut session = memory_session();
    let opts = HarvestOptions {
        quota: Some(5),
        ..options()
    };

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &opts)
        .await
        .unwrap();

    assert_eq!(outcome.stop, StopReason::QuotaReached);
    assert_eq!(outcome.saved, 5);
    assert_eq!(session.sink().reviews.len(), 5);
    assert_eq!(browser.requests.len(), 1);
}

#[tokio::test]
async fn test_max_pages_caps_unknown_totals() {
    let mut browser = ScriptedBrowser::new(|url| {
        ok_json(json!({"data": comments((0..3).map(|i| page_of(url) * 10 + i))}))
    });
    let mut session = memory_session();
    let opts = HarvestOptions {
        max_pages: Some(2),
        ..options()
    };

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &opts)
        .await
        .unwrap();

    assert_eq!(outcome.stop, StopReason::PageCeiling);
    assert_eq!(outcome.pages_fetched, 2);
    assert_eq!(outcome.saved, 6);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let mut calls = 0;
    let mut browser = ScriptedBrowser::new(move |_| {
        calls += 1;
        if calls == 1 {
            RawResponse {
                status: 503,
                body: "Service Unavailable".to_string(),
            }
        } else {
            ok_json(json!({"result": {"comments": comments([1, 2]), "totalPages": 1}}))
        }
    });
    let mut session = memory_session();

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &options())
        .await
        .unwrap();

    assert_eq!(browser.requests.len(), 2);
    assert_eq!(outcome.saved, 2);
    assert_eq!(outcome.stop, StopReason::PageCeiling);
    assert!(!outcome.used_fallback);
}

const JSON_LD_PAGE: &str = r#"<html><head>
<script type="application/ld+json">
{
    "@type": "Product",
    "name": "Shirt",
    "review": [
        {"@type": "Review", "identifier": "ld-1", "reviewBody": "Soft fabric", "reviewRating": {"ratingValue": 5}},
        {"@type": "Review", "identifier": "ld-2", "reviewBody": "Runs small", "reviewRating": {"ratingValue": 3}}
    ]
}
</script>
</head><body></body></html>"#;

#[tokio::test]
async fn test_non_json_responses_fall_back_to_json_ld() {
    let mut browser = ScriptedBrowser::new(|_| RawResponse {
        status: 200,
        body: "<html>Please enable JavaScript</html>".to_string(),
    });
    browser.html = JSON_LD_PAGE.to_string();
    let mut session = memory_session();

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &options())
        .await
        .unwrap();

    assert_eq!(browser.requests.len(), 3);
    assert!(outcome.used_fallback);
    assert_eq!(outcome.stop, StopReason::FallbackExhausted);
    assert_eq!(outcome.saved, 2);
    assert_eq!(outcome.pages_fetched, 0);
    assert!(session.has_diagnostic("api-failure-123"));

    let ids: Vec<_> = session
        .sink()
        .reviews
        .iter()
        .filter_map(|r| r.review_id.as_deref())
        .collect();
    assert_eq!(ids, vec!["ld-1", "ld-2"]);
}

#[tokio::test]
async fn test_fallback_without_json_ld_keeps_prior_count() {
    let mut browser = ScriptedBrowser::new(|url| {
        if page_of(url) == 1 {
            ok_json(json!({"comments": comments([1, 2, 3]), "totalCount": 30, "size": 3}))
        } else {
            RawResponse {
                status: 429,
                body: String::new(),
            }
        }
    });
    let mut session = memory_session();

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &options())
        .await
        .unwrap();

    assert!(outcome.used_fallback);
    assert_eq!(outcome.stop, StopReason::FallbackExhausted);
    assert_eq!(outcome.saved, 3);
    assert_eq!(outcome.pages_fetched, 1);
    // page 1 once, page 2 three times
    assert_eq!(browser.requests.len(), 4);
}

#[tokio::test]
async fn test_fallback_respects_quota() {
    let mut browser = ScriptedBrowser::new(|_| RawResponse {
        status: 500,
        body: String::new(),
    });
    browser.html = JSON_LD_PAGE.to_string();
    let mut session = memory_session();
    let opts = HarvestOptions {
        quota: Some(1),
        ..options()
    };

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &opts)
        .await
        .unwrap();

    assert_eq!(outcome.saved, 1);
    assert_eq!(session.sink().reviews.len(), 1);
}

#[tokio::test]
async fn test_observed_first_page_is_used_and_deduped_against_fetches() {
    let mut browser = ScriptedBrowser::new(|url| match page_of(url) {
        2 => ok_json(json!({"result": {"comments": comments([2, 3]), "totalCount": 6, "size": 2}})),
        3 => ok_json(json!({"result": {"comments": comments([4, 5]), "totalCount": 6, "size": 2}})),
        _ => RawResponse {
            status: 404,
            body: String::new(),
        },
    });
    browser.observed = vec![
        ObservedExchange {
            url: "https://cdn.trendyol.com/static/app.js".to_string(),
            status: 200,
            headers: Vec::new(),
            body: String::new(),
        },
        ObservedExchange {
            url: format!("{}?contentId=123&page=1&size=2&channelId=1", API),
            status: 200,
            headers: vec![
                ("Cookie".to_string(), "session=secret".to_string()),
                ("x-client".to_string(), "web".to_string()),
            ],
            body: json!({"result": {"comments": comments([1, 2]), "totalCount": 6, "size": 2}})
                .to_string(),
        },
    ];
    let mut session = memory_session();

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &options())
        .await
        .unwrap();

    assert_eq!(outcome.template, Some(TemplateOrigin::Observed));
    assert_eq!(outcome.stop, StopReason::PageCeiling);
    assert_eq!(outcome.pages_fetched, 3);
    assert_eq!(outcome.saved, 5);

    let pages: Vec<u32> = browser.requests.iter().map(|u| page_of(u)).collect();
    assert_eq!(pages, vec![2, 3]);
    assert!(browser
        .requests
        .iter()
        .all(|u| query_param(u, "size").as_deref() == Some("2")
            && query_param(u, "channelId").as_deref() == Some("1")));

    let ids: Vec<_> = session
        .sink()
        .reviews
        .iter()
        .filter_map(|r| r.review_id.as_deref())
        .collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn test_observed_response_for_other_product_is_not_seeded() {
    let mut browser = ScriptedBrowser::new(|_| {
        ok_json(json!({"comments": comments([7]), "totalPages": 1}))
    });
    browser.observed = vec![ObservedExchange {
        url: format!("{}?contentId=999&page=1&size=20", API),
        status: 200,
        headers: Vec::new(),
        body: json!({"comments": comments([1, 2, 3])}).to_string(),
    }];
    let mut session = memory_session();

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &options())
        .await
        .unwrap();

    assert_eq!(outcome.template, Some(TemplateOrigin::Observed));
    assert_eq!(outcome.saved, 1);
    assert_eq!(browser.requests.len(), 1);
    assert_eq!(
        query_param(&browser.requests[0], "contentId").as_deref(),
        Some("123")
    );
}

#[tokio::test]
async fn test_failed_observed_response_is_not_seeded() {
    let mut browser = ScriptedBrowser::new(|_| {
        ok_json(json!({"comments": comments([7, 8]), "totalPages": 1}))
    });
    browser.observed = vec![ObservedExchange {
        url: format!("{}?contentId=123&page=1&size=20", API),
        status: 500,
        headers: Vec::new(),
        body: json!({"comments": comments([90, 91])}).to_string(),
    }];
    let mut session = memory_session();

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &options())
        .await
        .unwrap();

    assert_eq!(outcome.template, Some(TemplateOrigin::Observed));
    let pages: Vec<u32> = browser.requests.iter().map(|u| page_of(u)).collect();
    assert_eq!(pages, vec![1]);

    let ids: Vec<_> = session
        .sink()
        .reviews
        .iter()
        .filter_map(|r| r.review_id.as_deref())
        .collect();
    assert_eq!(ids, vec!["7", "8"]);
}

#[tokio::test]
async fn test_observed_later_page_is_not_seeded() {
    let mut browser = ScriptedBrowser::new(|_| {
        ok_json(json!({"comments": comments([7, 8]), "totalPages": 1}))
    });
    browser.observed = vec![ObservedExchange {
        url: format!("{}?contentId=123&page=2&size=20", API),
        status: 200,
        headers: Vec::new(),
        body: json!({"comments": comments([90, 91])}).to_string(),
    }];
    let mut session = memory_session();

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &options())
        .await
        .unwrap();

    assert_eq!(outcome.template, Some(TemplateOrigin::Observed));
    assert_eq!(outcome.pages_fetched, 1);
    let pages: Vec<u32> = browser.requests.iter().map(|u| page_of(u)).collect();
    assert_eq!(pages, vec![1]);

    let ids: Vec<_> = session
        .sink()
        .reviews
        .iter()
        .filter_map(|r| r.review_id.as_deref())
        .collect();
    assert_eq!(ids, vec!["7", "8"]);
}

#[tokio::test]
async fn test_observed_payload_size_carries_to_later_pages() {
    let mut browser = ScriptedBrowser::new(|url| match page_of(url) {
        2 => ok_json(json!({"comments": comments([3, 4]), "totalCount": 6, "size": 2})),
        3 => ok_json(json!({"comments": comments([5, 6]), "totalCount": 6, "size": 2})),
        _ => RawResponse {
            status: 404,
            body: String::new(),
        },
    });
    browser.observed = vec![ObservedExchange {
        url: format!("{}?contentId=123&page=1", API),
        status: 200,
        headers: Vec::new(),
        body: json!({"comments": comments([1, 2]), "totalCount": 6, "size": 2}).to_string(),
    }];
    let mut session = memory_session();

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &options())
        .await
        .unwrap();

    assert_eq!(outcome.stop, StopReason::PageCeiling);
    assert_eq!(outcome.saved, 6);
    let pages: Vec<u32> = browser.requests.iter().map(|u| page_of(u)).collect();
    assert_eq!(pages, vec![2, 3]);
    assert!(browser
        .requests
        .iter()
        .all(|u| query_param(u, "size").as_deref() == Some("2")));
}

#[tokio::test]
async fn test_navigation_is_retried_before_giving_up() {
    let mut browser = ScriptedBrowser::new(|_| {
        ok_json(json!({"comments": comments([1, 2]), "totalPages": 1}))
    });
    let shirt = target("123");
    browser.flaky.insert(shirt.seed_url.clone(), 1);
    let mut session = memory_session();

    let outcome = harvest_target(&mut browser, &mut session, &shirt, &options())
        .await
        .unwrap();

    assert_eq!(browser.navigations.len(), 2);
    assert_eq!(outcome.stop, StopReason::PageCeiling);
    assert_eq!(outcome.saved, 2);
}

#[tokio::test]
async fn test_blocked_page_saves_one_diagnostic() {
    let dir = TempDir::new().unwrap();
    let mut browser = ScriptedBrowser::new(|_| ok_json(json!({"comments": comments([1])})));
    browser.title = "Access Denied".to_string();
    browser.html = "<html>denied</html>".to_string();
    let mut session = HarvestSession::new(
        MemorySink::new(),
        DiagnosticStore::new(Some(dir.path().to_path_buf())),
    );

    let first = harvest_target(&mut browser, &mut session, &target("123"), &options())
        .await
        .unwrap();
    browser.html = "<html>second</html>".to_string();
    let second = harvest_target(&mut browser, &mut session, &target("123"), &options())
        .await
        .unwrap();

    assert_eq!(first.stop, StopReason::Blocked);
    assert_eq!(second.stop, StopReason::Blocked);
    assert!(browser.requests.is_empty());

    let saved = std::fs::read_to_string(dir.path().join("blocked-123.html")).unwrap();
    assert_eq!(saved, "<html>denied</html>");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_consent_failure_ends_target() {
    let mut browser = ScriptedBrowser::new(|_| ok_json(json!({"comments": comments([1])})));
    browser.consent = ConsentBanner::Stuck;
    let mut session = memory_session();

    let outcome = harvest_target(&mut browser, &mut session, &target("123"), &options())
        .await
        .unwrap();

    assert_eq!(outcome.stop, StopReason::ConsentNotSatisfied);
    assert!(browser.requests.is_empty());
}

#[tokio::test]
async fn test_satisfied_target_is_skipped() {
    let mut browser = ScriptedBrowser::new(|url| {
        ok_json(json!({"comments": comments((0..5).map(|i| page_of(url) * 10 + i))}))
    });
    let mut session = memory_session();
    let opts = HarvestOptions {
        quota: Some(3),
        ..options()
    };

    let first = harvest_target(&mut browser, &mut session, &target("123"), &opts)
        .await
        .unwrap();
    let second = harvest_target(&mut browser, &mut session, &target("123"), &opts)
        .await
        .unwrap();

    assert_eq!(first.stop, StopReason::QuotaReached);
    assert_eq!(second.stop, StopReason::AlreadySatisfied);
    assert_eq!(second.saved, 3);
    assert_eq!(browser.navigations.len(), 1);
}

#[tokio::test]
async fn test_run_continues_past_failed_target() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("reviews.jsonl");

    let mut browser = ScriptedBrowser::new(|url| {
        let id: u32 = query_param(url, "contentId")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        ok_json(json!({"comments": comments([id]), "totalPages": 1}))
    });
    let broken = target("111");
    browser.unreachable.insert(broken.seed_url.clone());

    let sink = JsonlSink::create(&output).unwrap();
    let mut session = HarvestSession::new(sink, DiagnosticStore::new(None));
    let targets = vec![broken, target("222")];

    let summary = run_harvest(&mut browser, &mut session, &targets, &options())
        .await
        .unwrap();

    assert_eq!(summary.targets.len(), 2);
    assert_eq!(summary.targets[0].stop, StopReason::NavigationFailed);
    let broken_loads = browser
        .navigations
        .iter()
        .filter(|u| u.contains("-p-111"))
        .count();
    assert_eq!(broken_loads, 3);
    assert_eq!(summary.targets[1].saved, 1);
    assert_eq!(summary.total_saved, 1);

    let contents = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["productId"], "222");
    assert_eq!(lines[0]["reviewId"], "222");
    assert_eq!(lines[0]["rating"], 5.0);
}
