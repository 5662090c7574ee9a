//! trendyol-reviews - Trendyol product review harvester.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trendyol_reviews::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let default_filter = if cli::is_verbose() {
        "trendyol_reviews=debug"
    } else {
        "trendyol_reviews=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run().await
}
