//! Harvest targets: one product whose reviews are being collected.

use serde::{Deserialize, Serialize};

/// Generic landing page used when no product URL was supplied.
pub const HOME_URL: &str = "https://www.trendyol.com/en";

/// A product under review collection.
///
/// Keyed by `product_id`. Fields supplied later only fill gaps; see
/// [`Target::merge_missing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Numeric product (content) id.
    pub product_id: String,
    /// Canonical product page, reviews suffix stripped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_url: Option<String>,
    /// Canonical reviews sub-page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_page_url: Option<String>,
    /// First URL the browser visits for this target.
    pub seed_url: String,
}

impl Target {
    /// Create a target with only an id; the seed falls back to the home page.
    pub fn new(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            product_url: None,
            review_page_url: None,
            seed_url: HOME_URL.to_string(),
        }
    }

    /// Fill absent fields from `other`, never overwriting present values.
    ///
    /// The seed URL only counts as present when it is not the generic home
    /// page placeholder.
    pub fn merge_missing(&mut self, other: Target) {
        if self.product_url.is_none() {
            self.product_url = other.product_url;
        }
        if self.review_page_url.is_none() {
            self.review_page_url = other.review_page_url;
        }
        if self.seed_url == HOME_URL && other.seed_url != HOME_URL {
            self.seed_url = other.seed_url;
        }
    }

    /// Referer to send with API requests for this target.
    pub fn referer(&self) -> &str {
        self.review_page_url.as_deref().unwrap_or(&self.seed_url)
    }
}
