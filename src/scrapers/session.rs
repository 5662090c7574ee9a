//! Run-scoped harvest state.

use std::collections::HashMap;

use super::dedup::Deduplicator;
use crate::error::Result;
use crate::models::Review;
use crate::storage::{DiagnosticStore, ReviewSink};

/// What happened to a review offered to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Emitted,
    Duplicate,
    QuotaReached,
}

/// Everything that lives for exactly one run: the dedup set, per-target
/// tallies, diagnostic labels, and the sinks.
pub struct HarvestSession<S: ReviewSink> {
    sink: S,
    diagnostics: DiagnosticStore,
    dedup: Deduplicator,
    tallies: HashMap<String, u64>,
}

impl<S: ReviewSink> HarvestSession<S> {
    pub fn new(sink: S, diagnostics: DiagnosticStore) -> Self {
        Self {
            sink,
            diagnostics,
            dedup: Deduplicator::new(),
            tallies: HashMap::new(),
        }
    }

    /// Reviews emitted so far for one product.
    pub fn saved_for(&self, product_id: &str) -> u64 {
        self.tallies.get(product_id).copied().unwrap_or(0)
    }

    /// `quota` of `None` never fills.
    pub fn quota_reached(&self, product_id: &str, quota: Option<u64>) -> bool {
        quota.is_some_and(|q| self.saved_for(product_id) >= q)
    }

    /// Dedup, quota-check and emit one review.
    pub fn offer(&mut self, review: &Review, quota: Option<u64>) -> Result<Offer> {
        if self.quota_reached(&review.product_id, quota) {
            return Ok(Offer::QuotaReached);
        }
        if !self.dedup.accept(review) {
            return Ok(Offer::Duplicate);
        }

        self.sink.emit(review)?;
        *self.tallies.entry(review.product_id.clone()).or_insert(0) += 1;
        Ok(Offer::Emitted)
    }

    /// Save a diagnostic snapshot once per label.
    pub fn save_diagnostic(&mut self, label: &str, html: &str) -> bool {
        self.diagnostics.save(label, html)
    }

    pub fn has_diagnostic(&self, label: &str) -> bool {
        self.diagnostics.contains(label)
    }

    pub fn total_saved(&self) -> u64 {
        self.tallies.values().sum()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
