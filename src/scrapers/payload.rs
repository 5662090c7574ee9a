//! Review API payload normalization.
//!
//! Several API generations are live at once, each with its own envelope and
//! field names. Everything here is alias-driven and never fails: a field that
//! cannot be read is simply absent from the resulting [`Review`].

use serde_json::Value;

use crate::models::{Review, Target};
use crate::utils::{
    first_present, get_count, get_number, is_truthy, parse_date, parse_tri_bool, value_to_text,
};

const ENVELOPE_KEYS: &[&str] = &["result", "data"];
const COMMENT_LIST_KEYS: &[&str] = &["reviews", "comments", "commentList", "items", "data", "results"];
const TOTAL_COUNT_KEYS: &[&str] = &["totalCount", "total", "count", "totalElements"];
const PAGE_SIZE_KEYS: &[&str] = &["size", "pageSize", "perPage"];
const TOTAL_PAGES_KEYS: &[&str] = &["totalPages", "pageCount"];

const REVIEW_ID_KEYS: &[&str] = &["id", "commentId", "reviewId", "reviewID"];
const RATING_KEYS: &[&str] = &["rate", "rating", "starRating", "score"];
const TITLE_KEYS: &[&str] = &["commentTitle", "title", "header"];
const COMMENT_KEYS: &[&str] = &["comment", "text", "commentText", "review"];
const DATE_KEYS: &[&str] = &["commentDate", "creationDate", "createdDate", "createdAt", "date"];
const LIKE_KEYS: &[&str] = &["likeCount", "helpfulCount", "like"];
const DISLIKE_KEYS: &[&str] = &["dislikeCount", "unhelpfulCount", "dislike"];
const VERIFIED_KEYS: &[&str] = &["isVerified", "isBuyer", "isPurchased", "isVerifiedPurchase"];
const SIZE_KEYS: &[&str] = &["productSize", "size", "sizeName", "variant.size"];
const COLOR_KEYS: &[&str] = &["productColor", "color", "colorName", "variant.color"];
const IMAGE_KEYS: &[&str] = &["images", "imageUrls", "media"];
const IMAGE_FLAG_KEYS: &[&str] = &["hasPhoto", "hasImage"];

/// One page of the review API, reduced to what pagination needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageFetchResult {
    pub comments: Vec<Value>,
    pub total_count: Option<u64>,
    pub page_size: Option<u64>,
    pub total_pages: Option<u64>,
}

impl PageFetchResult {
    /// Page count implied by the payload, if it says enough to know.
    ///
    /// `requested_size` stands in when the payload omits its page size.
    /// Zero counts say nothing and are treated as absent.
    pub fn inferred_total_pages(&self, requested_size: u32) -> Option<u64> {
        if let Some(pages) = self.total_pages.filter(|p| *p > 0) {
            return Some(pages);
        }
        let size = self
            .page_size
            .filter(|s| *s > 0)
            .unwrap_or(u64::from(requested_size));
        match (self.total_count.filter(|c| *c > 0), size) {
            (Some(total), size) if size > 0 => Some(total.div_ceil(size)),
            _ => None,
        }
    }
}

/// Parse a response body, accepting only a JSON object or array.
pub fn parse_payload_body(body: &str) -> Option<Value> {
    serde_json::from_str::<Value>(body.trim())
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

fn first_non_null<'a>(data: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let obj = data.as_object()?;
    keys.iter().filter_map(|key| obj.get(*key)).find(|v| !v.is_null())
}

/// Pull the comment list and paging counts out of an arbitrarily shaped payload.
pub fn extract_reviews_from_payload(payload: &Value) -> PageFetchResult {
    let root = first_non_null(payload, ENVELOPE_KEYS)
        .filter(|inner| inner.is_object())
        .unwrap_or(payload);

    let comments = match first_non_null(root, COMMENT_LIST_KEYS) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };

    let count = |keys: &[&str]| first_non_null(root, keys).and_then(get_count);

    PageFetchResult {
        comments,
        total_count: count(TOTAL_COUNT_KEYS),
        page_size: count(PAGE_SIZE_KEYS),
        total_pages: count(TOTAL_PAGES_KEYS),
    }
}

/// Map one raw API comment to a review for `target`.
///
/// Returns `None` for non-objects and for comments with no content fields.
pub fn map_review(raw: &Value, target: &Target) -> Option<Review> {
    if !raw.is_object() {
        return None;
    }

    let text = |keys: &[&str]| first_present(raw, keys).and_then(value_to_text);
    let created = first_present(raw, DATE_KEYS).and_then(parse_date);
    let has_image = first_present(raw, IMAGE_KEYS).is_some_and(is_truthy)
        || first_present(raw, IMAGE_FLAG_KEYS).is_some_and(is_truthy);

    let review = Review {
        product_id: target.product_id.clone(),
        review_id: text(REVIEW_ID_KEYS),
        rating: first_present(raw, RATING_KEYS).and_then(get_number),
        title: text(TITLE_KEYS),
        comment: text(COMMENT_KEYS),
        created_at: created.as_ref().map(|d| d.iso.clone()),
        created_at_timestamp: created.as_ref().map(|d| d.timestamp_ms),
        like_count: first_present(raw, LIKE_KEYS).and_then(get_count),
        dislike_count: first_present(raw, DISLIKE_KEYS).and_then(get_count),
        is_verified_purchase: first_present(raw, VERIFIED_KEYS).and_then(parse_tri_bool),
        product_size: text(SIZE_KEYS),
        product_color: text(COLOR_KEYS),
        has_image,
        review_page_url: target.review_page_url.clone(),
        product_url: target.product_url.clone(),
    }
    .sanitized();

    review.has_content().then_some(review)
}
