//! Target resolution: raw product ids and URLs into canonical [`Target`]s.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::error::{HarvestError, Result};
use crate::models::{Target, HOME_URL};

/// Query parameters that may carry the content id, in priority order.
const ID_QUERY_PARAMS: &[&str] = &["contentId", "productId", "id"];

static STRICT_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)-p-(\d+)").unwrap());
static LOOSE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)p-(\d+)").unwrap());
static REVIEWS_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/reviews/?$").unwrap());

/// A start URL as supplied in job input: a bare string or `{ "url": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StartUrl {
    Plain(String),
    Object { url: String },
}

impl StartUrl {
    pub fn as_str(&self) -> &str {
        match self {
            StartUrl::Plain(url) | StartUrl::Object { url } => url,
        }
    }
}

impl From<&str> for StartUrl {
    fn from(url: &str) -> Self {
        StartUrl::Plain(url.to_string())
    }
}

fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

fn id_from_path(text: &str) -> Option<String> {
    STRICT_ID
        .captures(text)
        .or_else(|| LOOSE_ID.captures(text))
        .map(|caps| caps[1].to_string())
}

/// Pull the numeric product id out of an id or a product/review URL.
pub fn extract_product_id(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if is_numeric(value) {
        return Some(value.to_string());
    }

    if let Ok(url) = Url::parse(value) {
        for param in ID_QUERY_PARAMS {
            let found = url
                .query_pairs()
                .find(|(key, v)| key == param && is_numeric(v.trim()));
            if let Some((_, v)) = found {
                return Some(v.trim().to_string());
            }
        }
        if let Some(id) = id_from_path(url.path()) {
            return Some(id);
        }
    }

    id_from_path(value)
}

/// Canonical reviews sub-page for a product URL.
///
/// Query and fragment are dropped; `/reviews` is appended unless present.
pub fn build_review_page_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    url.set_query(None);
    url.set_fragment(None);

    let path = url.path().trim_end_matches('/').to_string();
    if !path.to_ascii_lowercase().ends_with("/reviews") {
        url.set_path(&format!("{}/reviews", path));
    } else {
        url.set_path(&path);
    }
    Some(url.to_string())
}

/// Canonical product page: fragment and a trailing `/reviews` removed.
pub fn normalize_product_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    url.set_fragment(None);

    let path = url.path().to_string();
    if REVIEWS_SUFFIX.is_match(&path) {
        let stripped = REVIEWS_SUFFIX.replace(&path, "");
        let stripped = if stripped.is_empty() { "/" } else { &stripped };
        url.set_path(stripped);
    }
    Some(url.to_string())
}

/// Targets keyed by product id, in order of first appearance.
#[derive(Debug, Default, Clone)]
pub struct TargetSet {
    targets: Vec<Target>,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge a target; present fields are never overwritten.
    pub fn upsert(&mut self, target: Target) {
        match self
            .targets
            .iter_mut()
            .find(|t| t.product_id == target.product_id)
        {
            Some(existing) => existing.merge_missing(target),
            None => self.targets.push(target),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn into_vec(self) -> Vec<Target> {
        self.targets
    }
}

/// Resolve the job's product id and start URLs into targets.
///
/// Unresolvable inputs are skipped with a warning. An empty result is an error.
pub fn resolve_targets(product_id: Option<&str>, start_urls: &[StartUrl]) -> Result<Vec<Target>> {
    let mut set = TargetSet::new();

    if let Some(raw) = product_id.filter(|s| !s.trim().is_empty()) {
        match extract_product_id(raw) {
            Some(id) => set.upsert(Target::new(id)),
            None => warn!("Skipping productId {:?}: no numeric id found", raw),
        }
    }

    for start in start_urls {
        let raw = start.as_str().trim();
        if raw.is_empty() {
            continue;
        }
        let Some(id) = extract_product_id(raw) else {
            warn!("Skipping start URL {}: no product id found", raw);
            continue;
        };

        let review_page_url = build_review_page_url(raw);
        let seed_url = review_page_url
            .clone()
            .unwrap_or_else(|| HOME_URL.to_string());
        set.upsert(Target {
            product_id: id,
            product_url: normalize_product_url(raw),
            review_page_url,
            seed_url,
        });
    }

    if set.is_empty() {
        return Err(HarvestError::NoTargets);
    }
    Ok(set.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_product_id_variants() {
        assert_eq!(extract_product_id(" 123456 "), Some("123456".into()));
        assert_eq!(
            extract_product_id("https://www.trendyol.com/brand/shirt-p-987654"),
            Some("987654".into())
        );
        assert_eq!(
            extract_product_id("https://www.trendyol.com/brand/shirt-P-987654/reviews?boutiqueId=1"),
            Some("987654".into())
        );
        assert_eq!(
            extract_product_id("https://www.trendyol.com/x?productId=abc&contentId=555"),
            Some("555".into())
        );
        assert_eq!(
            extract_product_id("https://www.trendyol.com/x?id=42"),
            Some("42".into())
        );
        assert_eq!(extract_product_id("/brand/shirt-p-111"), Some("111".into()));
        assert_eq!(extract_product_id("p-222"), Some("222".into()));
        assert_eq!(extract_product_id("https://www.trendyol.com/en"), None);
        assert_eq!(extract_product_id(""), None);
    }

    #[test]
    fn test_extract_product_id_is_idempotent() {
        for input in [
            "https://www.trendyol.com/brand/shirt-p-987654",
            "https://www.trendyol.com/x?contentId=555",
            "777",
        ] {
            let once = extract_product_id(input).unwrap();
            assert_eq!(extract_product_id(&once), Some(once.clone()));
        }
    }

    #[test]
    fn test_build_review_page_url() {
        assert_eq!(
            build_review_page_url("https://www.trendyol.com/b/shirt-p-1?x=1#top").as_deref(),
            Some("https://www.trendyol.com/b/shirt-p-1/reviews")
        );
        assert_eq!(
            build_review_page_url("https://www.trendyol.com/b/shirt-p-1/reviews/").as_deref(),
            Some("https://www.trendyol.com/b/shirt-p-1/reviews")
        );
        assert_eq!(build_review_page_url("not a url"), None);
    }

    #[test]
    fn test_normalize_product_url() {
        assert_eq!(
            normalize_product_url("https://www.trendyol.com/b/shirt-p-1/Reviews?x=1#frag").as_deref(),
            Some("https://www.trendyol.com/b/shirt-p-1?x=1")
        );
        assert_eq!(
            normalize_product_url("https://www.trendyol.com/b/shirt-p-1").as_deref(),
            Some("https://www.trendyol.com/b/shirt-p-1")
        );
    }

    #[test]
    fn test_resolve_targets_merges_by_id() {
        let urls = vec![
            StartUrl::from("https://www.trendyol.com/b/shirt-p-1"),
            StartUrl::Object {
                url: "https://www.trendyol.com/other/shirt-p-1".into(),
            },
            StartUrl::from("https://www.trendyol.com/b/pants-p-2/reviews"),
            StartUrl::from("https://www.trendyol.com/en"),
        ];
        let targets = resolve_targets(Some("1"), &urls).unwrap();

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].product_id, "1");
        assert_eq!(
            targets[0].product_url.as_deref(),
            Some("https://www.trendyol.com/b/shirt-p-1")
        );
        assert_eq!(targets[0].seed_url, "https://www.trendyol.com/b/shirt-p-1/reviews");
        assert_eq!(targets[1].product_id, "2");
        assert_eq!(
            targets[1].product_url.as_deref(),
            Some("https://www.trendyol.com/b/pants-p-2")
        );
    }

    #[test]
    fn test_bare_id_seeds_home_page() {
        let targets = resolve_targets(Some("123"), &[]).unwrap();
        assert_eq!(targets[0].seed_url, HOME_URL);
    }

    #[test]
    fn test_no_targets_is_error() {
        let err = resolve_targets(Some("abc"), &[StartUrl::from("https://x.com/")]).unwrap_err();
        assert!(matches!(err, HarvestError::NoTargets));
    }

    #[test]
    fn test_start_url_deserializes_both_forms() {
        let urls: Vec<StartUrl> =
            serde_json::from_str(r#"["https://a/x-p-1", {"url": "https://b/y-p-2"}]"#).unwrap();
        assert_eq!(urls[0].as_str(), "https://a/x-p-1");
        assert_eq!(urls[1].as_str(), "https://b/y-p-2");
    }
}
