//! Watchlist feed service
//!
//! Wires the Yahoo client, the chart cache and the subscription manager
//! together for a fixed list of symbols.

use crate::config::WatchlistFeedConfig;
use anyhow::{Context, Result};
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tickerfeed_rust_core::cache::{ChartCache, Clock, KvStore, MemoryStore, SystemClock};
use tickerfeed_rust_core::clients::{HistorySource, PriceSource, YahooChartClient};
use tickerfeed_rust_core::feed::{SubscriptionHandle, SubscriptionManager};
use tickerfeed_rust_core::models::{ConnectionStatus, FeedEvent, OhlcvPoint, Timeframe};
use tickerfeed_rust_core::redis::RedisKvStore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSnapshot {
    pub price: f64,
    pub change: f64,
}

pub struct WatchlistFeed {
    config: WatchlistFeedConfig,
    manager: SubscriptionManager,
    cache: Arc<ChartCache>,
    handles: Vec<SubscriptionHandle>,
    prices: Arc<Mutex<HashMap<String, PriceSnapshot>>>,
    last_error: Arc<Mutex<Option<String>>>,
    stats_task: Option<JoinHandle<()>>,
}

impl WatchlistFeed {
    /// Build the service against Yahoo and the configured store
    pub async fn init(config: WatchlistFeedConfig) -> Result<Self> {
        let yahoo = Arc::new(
            YahooChartClient::with_base_url(&config.yahoo_base_url)
                .context("Failed to create Yahoo client")?,
        );

        let store: Arc<dyn KvStore> = match &config.redis_url {
            Some(url) => {
                info!("Using Redis chart cache (namespace {})", config.cache_namespace);
                Arc::new(RedisKvStore::new(url, &config.cache_namespace).await?)
            }
            None => {
                warn!("REDIS_URL not set; chart cache is in-process only");
                Arc::new(MemoryStore::new())
            }
        };

        Self::with_parts(config, yahoo.clone(), yahoo, store, Arc::new(SystemClock)).await
    }

    /// Build the service from explicit collaborators
    pub async fn with_parts(
        config: WatchlistFeedConfig,
        prices: Arc<dyn PriceSource>,
        history: Arc<dyn HistorySource>,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let cache = Arc::new(ChartCache::open(store, history, clock, config.cache.clone()).await);
        let manager = SubscriptionManager::start(prices, config.feed.clone());

        let mut service = Self {
            config,
            manager,
            cache,
            handles: Vec::new(),
            prices: Arc::new(Mutex::new(HashMap::new())),
            last_error: Arc::new(Mutex::new(None)),
            stats_task: None,
        };

        service.subscribe_watchlist();

        if service.config.preload_on_start {
            service.preload().await;
        }

        service.stats_task = Some(tokio::spawn(stats_loop(
            service.manager.clone(),
            service.cache.clone(),
            Duration::from_secs(service.config.stats_log_interval_secs),
        )));

        info!(
            "Watchlist feed started for {} symbols",
            service.config.symbols.len()
        );
        Ok(service)
    }

    fn subscribe_watchlist(&mut self) {
        for symbol in self.config.symbols.clone() {
            let prices = self.prices.clone();
            let last_error = self.last_error.clone();
            let handle = self.manager.subscribe(&symbol, move |event: &FeedEvent| {
                match event {
                    FeedEvent::Price {
                        symbol,
                        price,
                        change,
                    } => {
                        info!("{} {:.2} ({:+.2}%)", symbol, price, change);
                        prices.lock().insert(
                            symbol.clone(),
                            PriceSnapshot {
                                price: *price,
                                change: *change,
                            },
                        );
                    }
                    FeedEvent::Status { status } => debug!("Feed status: {}", status),
                    FeedEvent::Error { message } => {
                        error!("Feed error: {}", message);
                        *last_error.lock() = Some(message.clone());
                    }
                }
                if let Ok(payload) = serde_json::to_string(event) {
                    debug!("event {}", payload);
                }
            });
            self.handles.push(handle);
        }
    }

    /// Warm the cache for every watchlist symbol; failures are logged only
    pub async fn preload(&self) {
        let results = join_all(
            self.config
                .symbols
                .iter()
                .map(|symbol| self.cache.preload_timeframes(symbol)),
        )
        .await;

        for (symbol, result) in self.config.symbols.iter().zip(results) {
            if let Err(e) = result {
                warn!("Chart preload failed for {}: {:#}", symbol, e);
            }
        }
    }

    /// Chart series for a symbol, served from cache when fresh
    pub async fn chart(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<OhlcvPoint>> {
        self.cache.get_or_fetch(symbol, timeframe).await
    }

    pub fn last_price(&self, symbol: &str) -> Option<PriceSnapshot> {
        self.prices.lock().get(symbol).copied()
    }

    /// Last error message broadcast by the feed, if any
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.manager.connection_status()
    }

    pub fn manager(&self) -> &SubscriptionManager {
        &self.manager
    }

    pub fn cache(&self) -> &Arc<ChartCache> {
        &self.cache
    }

    /// Unsubscribe the watchlist and tear the feed down
    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            self.manager.unsubscribe(&handle);
        }
        if let Some(task) = self.stats_task.take() {
            task.abort();
        }
        self.manager.cleanup();
        info!("Watchlist feed stopped");
    }
}

impl Drop for WatchlistFeed {
    fn drop(&mut self) {
        if let Some(task) = self.stats_task.take() {
            task.abort();
        }
    }
}

async fn stats_loop(manager: SubscriptionManager, cache: Arc<ChartCache>, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let stats = cache.get_stats();
        let feed = manager.stats();
        info!(
            "Cache: {} items / {} bytes, hit rate {:.1}% | Feed: {} ({} reconnects, {} failed)",
            stats.item_count,
            stats.total_size,
            stats.hit_rate() * 100.0,
            manager.connection_status(),
            feed.successful_reconnects,
            feed.failed_reconnects
        );
    }
}
