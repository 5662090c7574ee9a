//! Site-specific constants for the Trendyol storefront and review API.

use std::sync::LazyLock;

use regex::Regex;

/// Review comments endpoint on the public API gateway.
pub const REVIEW_API_URL: &str =
    "https://apigw.trendyol.com/discovery-web-productgw-service/api/review/comments";

/// Origin sent with explicit API requests.
pub const SITE_ORIGIN: &str = "https://www.trendyol.com";

/// Accept header sent with explicit API requests.
pub const API_ACCEPT: &str = "application/json, text/plain, */*";

/// Canonical query parameter names on the known endpoint.
pub const PARAM_CONTENT_ID: &str = "contentId";
pub const PARAM_SORT: &str = "orderBy";
pub const PARAM_DIRECTION: &str = "orderByDirection";
pub const PARAM_PAGE: &str = "page";
pub const PARAM_SIZE: &str = "size";

/// Page titles served by bot walls and challenge pages.
pub static BLOCKED_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(access denied|captcha|attention required|verify|robot|blocked)")
        .expect("blocked title regex is valid")
});

/// Check a page title against the block signature.
pub fn is_blocked_title(title: &str) -> bool {
    BLOCKED_TITLE.is_match(title)
}

/// Consent banner buttons, tried in order.
pub const CONSENT_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "button[id*='accept']",
    "button[class*='accept']",
];
