//! CLI parser and command dispatch.

mod harvest;
mod targets;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use crate::config::{Config, HarvestInput};
use crate::scrapers::StartUrl;

#[derive(Parser)]
#[command(name = "trendyol-reviews")]
#[command(about = "Adaptive review harvester for Trendyol product pages")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Job flags shared by every command. Flags override the input file.
#[derive(Args, Debug, Default)]
struct JobArgs {
    /// Job input JSON file
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Product id or product URL
    #[arg(short, long)]
    product_id: Option<String>,

    /// Product or review page URL (repeatable)
    #[arg(short = 'u', long = "start-url")]
    start_urls: Vec<String>,

    /// Reviews to collect per product (0 = unlimited)
    #[arg(short = 'n', long)]
    results_wanted: Option<u64>,

    /// Pages to fetch per product (0 = unlimited)
    #[arg(long)]
    max_pages: Option<u64>,

    /// Reviews per API page (1-50)
    #[arg(long)]
    page_size: Option<u64>,

    /// Sort field: Date, Rate or Helpfulness
    #[arg(long)]
    sort_by: Option<String>,

    /// Sort direction: ASC or DESC
    #[arg(long)]
    sort_direction: Option<String>,
}

impl JobArgs {
    async fn into_input(self) -> anyhow::Result<HarvestInput> {
        let mut input = match &self.input {
            Some(path) => HarvestInput::load(path)
                .await
                .with_context(|| format!("Failed to load job input {}", path.display()))?,
            None => HarvestInput::default(),
        };

        if let Some(id) = self.product_id {
            input.product_id = Some(Value::String(id));
        }
        input
            .start_urls
            .extend(self.start_urls.into_iter().map(StartUrl::Plain));
        if let Some(n) = self.results_wanted {
            input.results_wanted = Some(Value::from(n));
        }
        if let Some(n) = self.max_pages {
            input.max_pages = Some(Value::from(n));
        }
        if let Some(n) = self.page_size {
            input.reviews_per_page = Some(Value::from(n));
        }
        if self.sort_by.is_some() {
            input.sort_by = self.sort_by;
        }
        if self.sort_direction.is_some() {
            input.sort_direction = self.sort_direction;
        }
        Ok(input)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Collect reviews into a JSONL dataset
    Harvest {
        #[command(flatten)]
        job: JobArgs,

        /// Proxy URL passed to the browser (overrides the job input)
        #[arg(long)]
        proxy: Option<String>,

        /// Output JSONL file (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for HTML diagnostics (overrides config)
        #[arg(long)]
        debug_dir: Option<PathBuf>,

        /// Run the browser headless
        #[arg(long, conflicts_with = "headed")]
        headless: bool,

        /// Show the browser window
        #[arg(long)]
        headed: bool,

        /// Connect to a running Chrome DevTools endpoint instead of launching one
        #[arg(long, env = "BROWSER_URL")]
        remote_url: Option<String>,
    },

    /// Resolve job input into targets and print them as JSON
    Targets {
        #[command(flatten)]
        job: JobArgs,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .await
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load().await,
    };

    match cli.command {
        Commands::Harvest {
            job,
            proxy,
            output,
            debug_dir,
            headless,
            headed,
            remote_url,
        } => {
            let input = job.into_input().await?;
            let overrides = harvest::HarvestOverrides {
                proxy,
                output,
                debug_dir,
                headless: if headed {
                    Some(false)
                } else if headless {
                    Some(true)
                } else {
                    None
                },
                remote_url,
            };
            harvest::cmd_harvest(config, input, overrides).await
        }
        Commands::Targets { job } => {
            let input = job.into_input().await?;
            targets::cmd_targets(&input)
        }
    }
}
