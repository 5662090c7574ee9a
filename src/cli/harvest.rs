//! Harvest command.

use std::path::PathBuf;

use anyhow::Context;
use console::style;

use crate::config::{Config, HarvestInput};
use crate::scrapers::{run_harvest, BrowserSession, ChromiumSession, HarvestSession};
use crate::storage::{DiagnosticStore, JsonlSink};

/// Flag overrides for the tool configuration.
#[derive(Debug, Default)]
pub struct HarvestOverrides {
    pub proxy: Option<String>,
    pub output: Option<PathBuf>,
    pub debug_dir: Option<PathBuf>,
    pub headless: Option<bool>,
    pub remote_url: Option<String>,
}

/// Harvest reviews for every target in the job.
pub async fn cmd_harvest(
    mut config: Config,
    input: HarvestInput,
    overrides: HarvestOverrides,
) -> anyhow::Result<()> {
    let targets = input.resolve_targets()?;
    let options = config.harvest_options(&input);

    if let Some(proxy) = overrides.proxy.or_else(|| input.proxy_url().map(String::from)) {
        config.browser.proxy = Some(proxy);
    }
    if let Some(headless) = overrides.headless {
        config.browser.headless = headless;
    }
    if overrides.remote_url.is_some() {
        config.browser.remote_url = overrides.remote_url;
    }

    let output = match overrides.output {
        Some(path) => path,
        None => config.resolve_path(&config.output),
    };
    let debug_dir = match overrides.debug_dir {
        Some(dir) => Some(dir),
        None => config.debug_dir.as_deref().map(|dir| config.resolve_path(dir)),
    };

    tracing::info!(
        "Target product IDs: {}",
        targets
            .iter()
            .map(|t| t.product_id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let sink = JsonlSink::create(&output)
        .with_context(|| format!("Failed to open output {}", output.display()))?;
    let mut session = HarvestSession::new(sink, DiagnosticStore::new(debug_dir));
    let mut browser = ChromiumSession::new(config.browser.clone());

    let result = run_harvest(&mut browser, &mut session, &targets, &options).await;
    browser.close().await;
    let summary = result?;

    for outcome in &summary.targets {
        let marker = if outcome.saved > 0 {
            style("✓").green()
        } else {
            style("!").yellow()
        };
        println!(
            "  {} {}: {} reviews, {} pages ({})",
            marker, outcome.product_id, outcome.saved, outcome.pages_fetched, outcome.stop
        );
    }
    println!(
        "{} Saved {} reviews to {}",
        style("✓").green(),
        summary.total_saved,
        output.display()
    );

    Ok(())
}
