//! Canonical review record.

use serde::{Deserialize, Serialize};

use crate::utils::clean_text;

/// One normalized review, as handed to the output sink.
///
/// Serialized sparse: absent values are omitted rather than written as null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub product_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// ISO-8601, millisecond precision, UTC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dislike_count: Option<u64>,
    /// `None` means unknown, not false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_verified_purchase: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_color: Option<String>,
    #[serde(default)]
    pub has_image: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_url: Option<String>,
}

impl Review {
    /// Drop blank strings and non-finite numbers.
    pub fn sanitized(mut self) -> Self {
        fn clean(field: &mut Option<String>) {
            *field = field.as_deref().and_then(clean_text);
        }

        self.product_id = self.product_id.trim().to_string();
        clean(&mut self.review_id);
        clean(&mut self.title);
        clean(&mut self.comment);
        clean(&mut self.created_at);
        clean(&mut self.product_size);
        clean(&mut self.product_color);
        clean(&mut self.review_page_url);
        clean(&mut self.product_url);
        self.rating = self.rating.filter(|r| r.is_finite());
        self
    }

    /// True if anything beyond the identity and context fields is present.
    pub fn has_content(&self) -> bool {
        self.rating.is_some()
            || self.title.is_some()
            || self.comment.is_some()
            || self.created_at.is_some()
            || self.created_at_timestamp.is_some()
            || self.like_count.is_some()
            || self.dislike_count.is_some()
            || self.is_verified_purchase.is_some()
            || self.product_size.is_some()
            || self.product_color.is_some()
            || self.has_image
    }
}
