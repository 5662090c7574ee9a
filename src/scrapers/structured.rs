//! JSON-LD review extraction, used when the review API cannot be reached.

use scraper::{Html, Selector};
use serde_json::Value;

use crate::models::{Review, Target};
use crate::utils::{
    first_present, get_count, get_number, is_truthy, parse_date, parse_tri_bool, value_to_text,
};

const JSON_LD_SELECTOR: &str = r#"script[type="application/ld+json"]"#;

/// Raw text of every JSON-LD script block in a document.
pub fn json_ld_blocks(html: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(JSON_LD_SELECTOR) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .map(|el| el.text().collect::<String>())
        .filter(|text| !text.trim().is_empty())
        .collect()
}

fn push_objects(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.into_iter().for_each(|item| push_objects(item, out)),
        Value::Object(_) => out.push(value),
        _ => {}
    }
}

/// Parse JSON-LD blocks independently, flattening top-level arrays.
///
/// Blocks that fail to parse are skipped.
pub fn parse_json_ld(blocks: &[String]) -> Vec<Value> {
    let mut objects = Vec::new();
    for block in blocks {
        if let Ok(value) = serde_json::from_str::<Value>(block.trim()) {
            push_objects(value, &mut objects);
        }
    }
    objects
}

fn push_review_values(node: &Value, out: &mut Vec<Value>) {
    for key in ["review", "reviews"] {
        match node.get(key) {
            Some(Value::Array(items)) => out.extend(items.iter().filter(|v| v.is_object()).cloned()),
            Some(obj @ Value::Object(_)) => out.push(obj.clone()),
            _ => {}
        }
    }
}

fn is_review_node(node: &Value) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => t == "Review",
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some("Review")),
        _ => false,
    }
}

/// Review candidates from top-level objects and their `@graph` entries.
pub fn collect_reviews(objects: &[Value]) -> Vec<Value> {
    let mut reviews = Vec::new();
    for obj in objects {
        push_review_values(obj, &mut reviews);
        if let Some(Value::Array(graph)) = obj.get("@graph") {
            for node in graph {
                push_review_values(node, &mut reviews);
                if is_review_node(node) {
                    reviews.push(node.clone());
                }
            }
        }
    }
    reviews
}

/// Map a schema.org `Review` object for `target`.
pub fn map_json_ld_review(raw: &Value, target: &Target) -> Option<Review> {
    if !raw.is_object() {
        return None;
    }

    let text = |keys: &[&str]| first_present(raw, keys).and_then(value_to_text);
    let created = first_present(raw, &["datePublished", "dateCreated"]).and_then(parse_date);

    let review = Review {
        product_id: target.product_id.clone(),
        review_id: text(&["identifier", "id"]),
        rating: first_present(raw, &["reviewRating.ratingValue", "reviewRating.rating"])
            .and_then(get_number),
        title: text(&["name", "headline"]),
        comment: text(&["reviewBody", "description", "review"]),
        created_at: created.as_ref().map(|d| d.iso.clone()),
        created_at_timestamp: created.as_ref().map(|d| d.timestamp_ms),
        like_count: first_present(raw, &["interactionStatistic.userInteractionCount"])
            .and_then(get_count),
        is_verified_purchase: first_present(raw, &["isVerified", "verified"])
            .and_then(parse_tri_bool),
        has_image: raw.get("image").is_some_and(is_truthy),
        review_page_url: target.review_page_url.clone(),
        product_url: target.product_url.clone(),
        ..Default::default()
    }
    .sanitized();

    review.has_content().then_some(review)
}

/// Every review recoverable from a page's JSON-LD, in document order.
pub fn extract_fallback_reviews(blocks: &[String], target: &Target) -> Vec<Review> {
    collect_reviews(&parse_json_ld(blocks))
        .iter()
        .filter_map(|raw| map_json_ld_review(raw, target))
        .collect()
}
