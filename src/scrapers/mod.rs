//! Review harvesting for Trendyol product pages.

pub mod browser;
pub mod dedup;
pub mod endpoint;
pub mod harvest;
pub mod pacing;
pub mod payload;
pub mod session;
pub mod site;
pub mod structured;
pub mod targets;

pub use browser::{
    BrowserEngineConfig, BrowserEngineType, BrowserSession, ChromiumSession, ConsentBanner,
};
pub use dedup::{DedupKey, Deduplicator};
pub use endpoint::{ApiRequestTemplate, ReviewEndpointMatcher, SortBy, SortDirection, SortOrder};
pub use harvest::{harvest_target, run_harvest, HarvestOptions, RunSummary, StopReason, TargetOutcome};
pub use pacing::{PacingConfig, RetryPolicy};
pub use session::HarvestSession;
pub use targets::{extract_product_id, resolve_targets, StartUrl};
