use anyhow::Result;
use dotenv::dotenv;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use watchlist_feed_rust::{WatchlistFeed, WatchlistFeedConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    info!("Starting watchlist_feed_rust...");

    let config = WatchlistFeedConfig::from_env()?;
    let mut feed = WatchlistFeed::init(config).await?;

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Unable to listen for shutdown signal: {}", e),
    }

    feed.shutdown();
    Ok(())
}
