//! Harvest error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("No resolvable targets: provide at least one productId or startUrls entry")]
    NoTargets,
    #[error("Browser error: {0}")]
    Browser(String),
    #[error("Output sink error: {0}")]
    Sink(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HarvestError>;
