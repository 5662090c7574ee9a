//! Adaptive review harvester for Trendyol product pages.
//!
//! Discovers the review API from the page's own traffic, paginates it,
//! normalizes the many payload shapes it serves, and falls back to embedded
//! JSON-LD when the API cannot be reached. Each review is emitted once.

pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod scrapers;
pub mod storage;
pub mod utils;

pub use error::{HarvestError, Result};
