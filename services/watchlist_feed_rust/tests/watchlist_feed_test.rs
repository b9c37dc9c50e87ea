//! Watchlist feed service tests against in-process sources and storage.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickerfeed_rust_core::cache::{MemoryStore, SystemClock};
use tickerfeed_rust_core::clients::{HistorySource, PriceSource};
use tickerfeed_rust_core::feed::CONNECTION_LOST_MESSAGE;
use tickerfeed_rust_core::models::{ConnectionStatus, OhlcvPoint, Quote, Timeframe};
use watchlist_feed_rust::{WatchlistFeed, WatchlistFeedConfig};

#[derive(Default)]
struct FakeMarket {
    failing: AtomicBool,
    history_calls: AtomicUsize,
}

#[async_trait]
impl PriceSource for FakeMarket {
    fn source_name(&self) -> &str {
        "fake"
    }

    async fn latest_quote(&self, symbol: &str) -> Result<Quote> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("quote service down");
        }
        Ok(Quote::new(symbol, 105.0, 100.0))
    }
}

#[async_trait]
impl HistorySource for FakeMarket {
    async fn fetch_series(&self, _symbol: &str, _timeframe: Timeframe) -> Result<Vec<OhlcvPoint>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![OhlcvPoint {
            date: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            open: 100.0,
            high: 106.0,
            low: 99.0,
            close: 105.0,
            volume: 12_345.0,
        }])
    }
}

fn config(preload: bool) -> WatchlistFeedConfig {
    WatchlistFeedConfig {
        symbols: vec!["AAPL".to_string(), "MSFT".to_string()],
        preload_on_start: preload,
        ..WatchlistFeedConfig::default()
    }
}

async fn start(market: Arc<FakeMarket>, preload: bool) -> WatchlistFeed {
    let feed = WatchlistFeed::with_parts(
        config(preload),
        market.clone(),
        market,
        Arc::new(MemoryStore::new()),
        Arc::new(SystemClock),
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    feed
}

#[tokio::test(start_paused = true)]
async fn test_watchlist_receives_prices_and_preloads() {
    let market = Arc::new(FakeMarket::default());
    let mut feed = start(market.clone(), true).await;

    assert_eq!(feed.connection_status(), ConnectionStatus::Connected);
    let snapshot = feed.last_price("AAPL").unwrap();
    assert_eq!(snapshot.price, 105.0);
    assert!((snapshot.change - 5.0).abs() < 1e-9);
    assert!(feed.last_price("MSFT").is_some());

    assert_eq!(market.history_calls.load(Ordering::SeqCst), 6);
    assert_eq!(feed.cache().get_stats().item_count, 6);

    feed.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_chart_requests_use_cache() {
    let market = Arc::new(FakeMarket::default());
    let mut feed = start(market.clone(), true).await;

    feed.chart("AAPL", Timeframe::OneDay).await.unwrap();
    assert_eq!(market.history_calls.load(Ordering::SeqCst), 6);

    feed.chart("AAPL", Timeframe::FiveYears).await.unwrap();
    assert_eq!(market.history_calls.load(Ordering::SeqCst), 7);

    feed.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_preload_can_be_disabled() {
    let market = Arc::new(FakeMarket::default());
    let mut feed = start(market.clone(), false).await;

    assert_eq!(market.history_calls.load(Ordering::SeqCst), 0);
    assert_eq!(feed.cache().get_stats().item_count, 0);

    feed.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_outage_surfaces_connection_lost() {
    let market = Arc::new(FakeMarket::default());
    let mut feed = start(market.clone(), false).await;
    market.failing.store(true, Ordering::SeqCst);

    tokio::time::sleep(Duration::from_secs(90)).await;

    assert_eq!(feed.connection_status(), ConnectionStatus::Disconnected);
    assert_eq!(feed.last_error().as_deref(), Some(CONNECTION_LOST_MESSAGE));

    feed.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_subscriptions() {
    let market = Arc::new(FakeMarket::default());
    let mut feed = start(market, false).await;
    assert_eq!(feed.manager().subscribed_symbols(), vec!["AAPL", "MSFT"]);

    feed.shutdown();
    assert!(feed.manager().subscribed_symbols().is_empty());
}
