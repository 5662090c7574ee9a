//! Review API endpoint discovery.
//!
//! A request template is either rewritten from a live request the page made
//! on its own (so whatever parameter names and headers the current site
//! deployment uses are kept), or synthesized from the known gateway endpoint.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use super::site::{
    API_ACCEPT, PARAM_CONTENT_ID, PARAM_DIRECTION, PARAM_PAGE, PARAM_SIZE, PARAM_SORT,
    REVIEW_API_URL, SITE_ORIGIN,
};
use crate::models::Target;

const CONTENT_ID_KEYS: &[&str] = &["contentId", "productContentId", "productId", "itemId"];
const PAGE_KEYS: &[&str] = &["page", "pageIndex", "pageNumber", "pageNo", "currentPage"];
const SIZE_KEYS: &[&str] = &["size", "pageSize", "perPage", "limit"];
const SORT_KEYS: &[&str] = &["orderBy", "sortBy", "sort", "order"];
const DIRECTION_KEYS: &[&str] = &[
    "orderByDirection",
    "sortDirection",
    "direction",
    "orderDirection",
];

/// Request headers that must not be replayed from an observed request.
const STRIPPED_HEADERS: &[&str] = &[
    "host",
    "cookie",
    "content-length",
    "connection",
    "accept-encoding",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "te",
    "trailer",
];

static REVIEW_ENDPOINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(/review/comments|/api/(?:.*/)?reviews(?:/|$)|review-comments)").unwrap()
});

/// Whether the URL's path looks like a review API endpoint.
///
/// Only the path is considered; query strings can echo arbitrary text.
fn is_review_endpoint(pattern: &Regex, url: &str) -> bool {
    Url::parse(url).is_ok_and(|parsed| pattern.is_match(parsed.path()))
}

/// Predicate selecting review API traffic out of everything a page loads.
#[derive(Debug, Clone)]
pub struct ReviewEndpointMatcher {
    pattern: Regex,
}

impl ReviewEndpointMatcher {
    pub fn new() -> Self {
        Self {
            pattern: REVIEW_ENDPOINT.clone(),
        }
    }

    pub fn is_match(&self, url: &str) -> bool {
        is_review_endpoint(&self.pattern, url)
    }
}

impl Default for ReviewEndpointMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Review ordering field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortBy {
    #[default]
    Date,
    Rate,
    Helpfulness,
}

impl SortBy {
    /// Lenient parse; unknown values fall back to `Date`.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "rate" | "rating" => SortBy::Rate,
            "helpful" | "helpfulness" | "most helpful" => SortBy::Helpfulness,
            _ => SortBy::Date,
        }
    }

    pub fn as_param(&self) -> &'static str {
        match self {
            SortBy::Date => "Date",
            SortBy::Rate => "Rate",
            SortBy::Helpfulness => "Helpfulness",
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

/// Review ordering direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    /// Lenient parse; anything other than `ASC` is `DESC`.
    pub fn normalize(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("asc") {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        }
    }

    pub fn as_param(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

/// Requested ordering for review pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortOrder {
    pub by: SortBy,
    pub direction: SortDirection,
}

/// Where a template came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateOrigin {
    Observed,
    Synthesized,
}

/// Actual query keys used for each logical parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterNames {
    pub content_id: String,
    pub page: String,
    pub size: String,
    pub sort: Option<String>,
    pub direction: Option<String>,
}

/// Query values read back out of an observed review request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedQuery {
    pub content_id: Option<String>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

impl ObservedQuery {
    /// Read the recognized parameters from a request URL.
    pub fn parse(url: &str) -> Option<Self> {
        let url = Url::parse(url).ok()?;
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let value_of = |keys: &[&str]| {
            find_key(&pairs, keys).map(|idx| pairs[idx].1.trim().to_string())
        };

        Some(Self {
            content_id: value_of(CONTENT_ID_KEYS).filter(|v| !v.is_empty()),
            page: value_of(PAGE_KEYS).and_then(|v| v.parse().ok()),
            size: value_of(SIZE_KEYS).and_then(|v| v.parse().ok()),
        })
    }

    /// True when the request was for the first page (`0` or `1`, or unpaged).
    pub fn is_first_page(&self) -> bool {
        matches!(self.page, None | Some(0) | Some(1))
    }
}

/// A reusable recipe for requesting any page of a target's reviews.
#[derive(Debug, Clone)]
pub struct ApiRequestTemplate {
    base_url: Url,
    params: ParameterNames,
    headers: Vec<(String, String)>,
    origin: TemplateOrigin,
    zero_based_pages: bool,
}

fn find_key(pairs: &[(String, String)], variants: &[&str]) -> Option<usize> {
    variants
        .iter()
        .find_map(|variant| pairs.iter().position(|(key, _)| key == variant))
}

/// Point the first present variant at `value`, or append `canonical` if none is present.
fn rewrite_or_append(
    pairs: &mut Vec<(String, String)>,
    variants: &[&str],
    canonical: &str,
    value: &str,
) -> String {
    match find_key(pairs, variants) {
        Some(idx) => {
            pairs[idx].1 = value.to_string();
            pairs[idx].0.clone()
        }
        None => {
            pairs.push((canonical.to_string(), value.to_string()));
            canonical.to_string()
        }
    }
}

/// Drop hop-by-hop, cookie, proxy and HTTP/2 pseudo headers.
pub fn sanitize_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| {
            let lower = name.trim().to_ascii_lowercase();
            !(lower.is_empty()
                || lower.starts_with(':')
                || lower.starts_with("proxy-")
                || STRIPPED_HEADERS.contains(&lower.as_str()))
        })
        .map(|(name, value)| (name.trim().to_string(), value.clone()))
        .collect()
}

fn set_header_if_missing(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
        headers.push((name.to_string(), value.to_string()));
    }
}

fn default_headers(target: &Target) -> Vec<(String, String)> {
    vec![
        ("accept".to_string(), API_ACCEPT.to_string()),
        ("referer".to_string(), target.referer().to_string()),
        ("origin".to_string(), SITE_ORIGIN.to_string()),
    ]
}

impl ApiRequestTemplate {
    /// Rewrite a request the page issued itself into a template for `target`.
    ///
    /// Returns `None` if the URL is malformed, is not review traffic, or the
    /// target has no product id.
    pub fn from_observed(
        url: &str,
        headers: &[(String, String)],
        target: &Target,
        sort: SortOrder,
    ) -> Option<Self> {
        let product_id = target.product_id.trim();
        if product_id.is_empty() || !is_review_endpoint(&REVIEW_ENDPOINT, url) {
            return None;
        }

        let mut base_url = Url::parse(url).ok()?;
        let mut pairs: Vec<(String, String)> = base_url.query_pairs().into_owned().collect();

        let zero_based_pages = find_key(&pairs, PAGE_KEYS)
            .map(|idx| pairs[idx].1.trim() == "0")
            .unwrap_or(false);
        let first_page = if zero_based_pages { "0" } else { "1" };
        let observed_size = find_key(&pairs, SIZE_KEYS).map(|idx| pairs[idx].1.clone());

        let content_id = rewrite_or_append(&mut pairs, CONTENT_ID_KEYS, PARAM_CONTENT_ID, product_id);
        let page = rewrite_or_append(&mut pairs, PAGE_KEYS, PARAM_PAGE, first_page);
        let size = rewrite_or_append(
            &mut pairs,
            SIZE_KEYS,
            PARAM_SIZE,
            observed_size.as_deref().unwrap_or("20"),
        );
        let sort_key = find_key(&pairs, SORT_KEYS).map(|idx| {
            pairs[idx].1 = sort.by.as_param().to_string();
            pairs[idx].0.clone()
        });
        let direction_key = find_key(&pairs, DIRECTION_KEYS).map(|idx| {
            pairs[idx].1 = sort.direction.as_param().to_string();
            pairs[idx].0.clone()
        });

        base_url.query_pairs_mut().clear().extend_pairs(&pairs);

        let mut headers = sanitize_headers(headers);
        for (name, value) in default_headers(target) {
            set_header_if_missing(&mut headers, &name, &value);
        }

        Some(Self {
            base_url,
            params: ParameterNames {
                content_id,
                page,
                size,
                sort: sort_key,
                direction: direction_key,
            },
            headers,
            origin: TemplateOrigin::Observed,
            zero_based_pages,
        })
    }

    /// Build a template against the known gateway endpoint.
    pub fn synthesize(target: &Target, sort: SortOrder) -> Option<Self> {
        let product_id = target.product_id.trim();
        if product_id.is_empty() {
            return None;
        }

        let mut base_url = Url::parse(REVIEW_API_URL).ok()?;
        base_url
            .query_pairs_mut()
            .append_pair(PARAM_CONTENT_ID, product_id)
            .append_pair(PARAM_SORT, sort.by.as_param())
            .append_pair(PARAM_DIRECTION, sort.direction.as_param())
            .append_pair(PARAM_PAGE, "1")
            .append_pair(PARAM_SIZE, "20");

        Some(Self {
            base_url,
            params: ParameterNames {
                content_id: PARAM_CONTENT_ID.to_string(),
                page: PARAM_PAGE.to_string(),
                size: PARAM_SIZE.to_string(),
                sort: Some(PARAM_SORT.to_string()),
                direction: Some(PARAM_DIRECTION.to_string()),
            },
            headers: default_headers(target),
            origin: TemplateOrigin::Synthesized,
            zero_based_pages: false,
        })
    }

    /// Render the request URL for a 1-based logical page.
    pub fn page_url(&self, page: u32, size: u32) -> String {
        let wire_page = if self.zero_based_pages {
            page.saturating_sub(1)
        } else {
            page
        };

        let pairs: Vec<(String, String)> = self
            .base_url
            .query_pairs()
            .into_owned()
            .map(|(key, value)| {
                if key == self.params.page {
                    (key, wire_page.to_string())
                } else if key == self.params.size {
                    (key, size.to_string())
                } else {
                    (key, value)
                }
            })
            .collect();

        let mut url = self.base_url.clone();
        url.query_pairs_mut().clear().extend_pairs(&pairs);
        url.to_string()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn origin(&self) -> TemplateOrigin {
        self.origin
    }

    pub fn params(&self) -> &ParameterNames {
        &self.params
    }

    pub fn zero_based_pages(&self) -> bool {
        self.zero_based_pages
    }
}
