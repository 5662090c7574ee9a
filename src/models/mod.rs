//! Data models for the review harvester.

mod review;
mod target;

pub use review::Review;
pub use target::{Target, HOME_URL};
