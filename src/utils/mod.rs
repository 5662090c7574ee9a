//! Shared utility functions.
//!
//! - `json_path`: dotted path and alias probing over `serde_json::Value`
//! - `values`: locale-aware numbers, epoch/ISO dates, tri-state flags

pub mod json_path;
pub mod values;

pub use json_path::{extract_path, first_present, is_blank};
pub use values::{
    clean_text, get_count, get_number, is_truthy, parse_date, parse_tri_bool, value_to_text,
    ParsedDate,
};
