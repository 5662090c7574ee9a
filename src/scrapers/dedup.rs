//! Cross-source review deduplication.

use std::collections::HashSet;
use std::fmt;

use crate::models::Review;

/// Comment characters folded into a key when the review has no id.
const COMMENT_KEY_CHARS: usize = 80;

/// Stable identity of a logical review.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn for_review(review: &Review) -> Self {
        match review.review_id.as_deref() {
            Some(id) => Self(format!("{}:{}", review.product_id, id)),
            None => {
                let ts = review
                    .created_at_timestamp
                    .map(|t| t.to_string())
                    .unwrap_or_default();
                let comment: String = review
                    .comment
                    .as_deref()
                    .unwrap_or_default()
                    .chars()
                    .take(COMMENT_KEY_CHARS)
                    .collect();
                Self(format!("{}:{}:{}", review.product_id, ts, comment))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Run-scoped set of keys already emitted.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<DedupKey>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the review's key; false if it was already seen.
    pub fn accept(&mut self, review: &Review) -> bool {
        self.seen.insert(DedupKey::for_review(review))
    }
}
