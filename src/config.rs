//! Configuration management using the prefer crate.
//!
//! Two layers: the tool's own [`Config`] (browser, pacing, output paths),
//! discovered on disk, and the per-run [`HarvestInput`] job.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HarvestError, Result};
use crate::models::Target;
use crate::scrapers::endpoint::{SortBy, SortDirection, SortOrder};
use crate::scrapers::harvest::HarvestOptions;
use crate::scrapers::pacing::PacingConfig;
use crate::scrapers::targets::{resolve_targets, StartUrl};
use crate::scrapers::BrowserEngineConfig;
use crate::utils::{get_count, value_to_text};

pub const DEFAULT_RESULTS_WANTED: u64 = 20;
pub const DEFAULT_MAX_PAGES: u32 = 5;
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 50;

/// Tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Browser engine settings.
    #[serde(default)]
    pub browser: BrowserEngineConfig,

    /// Retry and inter-page delays.
    #[serde(default)]
    pub pacing: PacingConfig,

    /// How long to wait for the page's own review request, in milliseconds.
    #[serde(default = "default_observe_timeout_ms")]
    pub observe_timeout_ms: u64,

    /// Buffer size of the observed-response channel.
    #[serde(default = "default_observe_capacity")]
    pub observe_capacity: usize,

    /// JSONL dataset path.
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Directory for HTML diagnostics. Unset disables them.
    #[serde(default)]
    pub debug_dir: Option<PathBuf>,

    /// Path the config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn default_observe_timeout_ms() -> u64 {
    8000
}

fn default_observe_capacity() -> usize {
    16
}

fn default_output() -> PathBuf {
    PathBuf::from("reviews.jsonl")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser: BrowserEngineConfig::default(),
            pacing: PacingConfig::default(),
            observe_timeout_ms: default_observe_timeout_ms(),
            observe_capacity: default_observe_capacity(),
            output: default_output(),
            debug_dir: None,
            source_path: None,
        }
    }
}

impl Config {
    /// Discover a `trendyol-reviews` config file in the standard locations.
    ///
    /// Falls back to defaults (with env overrides) when none is found or it
    /// cannot be parsed.
    pub async fn load() -> Self {
        match prefer::load("trendyol-reviews").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring config {}: {}", path.display(), e);
                        Self::default_with_env()
                    }
                },
                None => Self::default_with_env(),
            },
            Err(_) => Self::default_with_env(),
        }
    }

    pub fn default_with_env() -> Self {
        let mut config = Self::default();
        config.browser = config.browser.with_env_overrides();
        config
    }

    /// Load configuration from a specific file, parsed by extension.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| HarvestError::Config(format!("Failed to read config file: {}", e)))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| HarvestError::Config(format!("Failed to parse TOML config: {}", e)))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| HarvestError::Config(format!("Failed to parse YAML config: {}", e)))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| HarvestError::Config(format!("Failed to parse JSON config: {}", e)))?,
        };

        config.source_path = Some(path.to_path_buf());
        config.browser = config.browser.with_env_overrides();
        Ok(config)
    }

    /// Relative paths in the config resolve against its directory.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match self.base_dir() {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Merge the job's knobs with the tool's pacing and observation settings.
    pub fn harvest_options(&self, input: &HarvestInput) -> HarvestOptions {
        HarvestOptions {
            quota: input.quota(),
            max_pages: input.max_pages(),
            page_size: input.page_size(),
            sort: input.sort(),
            observe_timeout: Duration::from_millis(self.observe_timeout_ms),
            observe_capacity: self.observe_capacity.max(1),
            pacing: self.pacing.clone(),
        }
    }
}

/// Proxy settings from the job. Opaque to the harvester.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProxyConfiguration {
    #[serde(rename = "proxyUrls", default)]
    pub proxy_urls: Vec<String>,
}

/// One harvest job, as read from a JSON input file.
///
/// Numeric knobs accept numbers or numeric strings; anything unreadable
/// falls back to its default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarvestInput {
    #[serde(rename = "productId", default)]
    pub product_id: Option<Value>,

    #[serde(rename = "startUrls", default)]
    pub start_urls: Vec<StartUrl>,

    /// Reviews per product (0 = unbounded).
    #[serde(default)]
    pub results_wanted: Option<Value>,

    /// Pages per product (0 = unbounded).
    #[serde(default)]
    pub max_pages: Option<Value>,

    #[serde(default)]
    pub reviews_per_page: Option<Value>,

    #[serde(rename = "sortBy", default)]
    pub sort_by: Option<String>,

    #[serde(rename = "sortDirection", default)]
    pub sort_direction: Option<String>,

    #[serde(rename = "proxyConfiguration", default)]
    pub proxy_configuration: Option<ProxyConfiguration>,
}

impl HarvestInput {
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| HarvestError::Config(format!("Failed to read input {}: {}", path.display(), e)))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| HarvestError::Config(format!("Failed to parse input JSON: {}", e)))
    }

    /// The single product id, as text.
    pub fn product_id(&self) -> Option<String> {
        self.product_id.as_ref().and_then(value_to_text)
    }

    /// `None` means unbounded.
    pub fn quota(&self) -> Option<u64> {
        match self.results_wanted.as_ref().and_then(get_count) {
            Some(0) => None,
            Some(n) => Some(n),
            None => Some(DEFAULT_RESULTS_WANTED),
        }
    }

    /// `None` means unbounded.
    pub fn max_pages(&self) -> Option<u32> {
        match self.max_pages.as_ref().and_then(get_count) {
            Some(0) => None,
            Some(n) => Some(u32::try_from(n).unwrap_or(u32::MAX)),
            None => Some(DEFAULT_MAX_PAGES),
        }
    }

    /// Requested page size, clamped to what the API serves.
    pub fn page_size(&self) -> u32 {
        self.reviews_per_page
            .as_ref()
            .and_then(get_count)
            .map(|n| n.clamp(1, u64::from(MAX_PAGE_SIZE)) as u32)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn sort(&self) -> SortOrder {
        SortOrder {
            by: self
                .sort_by
                .as_deref()
                .map(SortBy::normalize)
                .unwrap_or_default(),
            direction: self
                .sort_direction
                .as_deref()
                .map(SortDirection::normalize)
                .unwrap_or_default(),
        }
    }

    /// First configured proxy URL, if any.
    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_configuration
            .as_ref()
            .and_then(|p| p.proxy_urls.iter().map(|u| u.trim()).find(|u| !u.is_empty()))
    }

    pub fn resolve_targets(&self) -> Result<Vec<Target>> {
        resolve_targets(self.product_id().as_deref(), &self.start_urls)
    }
}
