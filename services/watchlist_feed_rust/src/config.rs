//! Configuration for watchlist_feed_rust

use anyhow::{anyhow, Result};
use std::env;
use tickerfeed_rust_core::cache::CacheConfig;
use tickerfeed_rust_core::clients::yahoo::DEFAULT_BASE_URL;
use tickerfeed_rust_core::env::parse_var;
use tickerfeed_rust_core::feed::FeedConfig;
use tickerfeed_rust_core::redis::DEFAULT_NAMESPACE;

#[derive(Debug, Clone)]
pub struct WatchlistFeedConfig {
    // Watchlist
    pub symbols: Vec<String>,

    // Feed and cache
    pub feed: FeedConfig,
    pub cache: CacheConfig,
    pub preload_on_start: bool,

    // Storage; falls back to an in-process store when unset
    pub redis_url: Option<String>,
    pub cache_namespace: String,

    // Upstream
    pub yahoo_base_url: String,

    // Monitoring
    pub stats_log_interval_secs: u64,
}

impl Default for WatchlistFeedConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["AAPL".to_string(), "MSFT".to_string(), "GOOGL".to_string()],
            feed: FeedConfig::default(),
            cache: CacheConfig::default(),
            preload_on_start: true,
            redis_url: None,
            cache_namespace: DEFAULT_NAMESPACE.to_string(),
            yahoo_base_url: DEFAULT_BASE_URL.to_string(),
            stats_log_interval_secs: 60,
        }
    }
}

impl WatchlistFeedConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let symbols = match env::var("WATCHLIST_SYMBOLS") {
            Ok(raw) => parse_symbols(&raw),
            Err(_) => defaults.symbols,
        };
        if symbols.is_empty() {
            return Err(anyhow!("WATCHLIST_SYMBOLS must name at least one symbol"));
        }

        let cache = CacheConfig::from_env()?;
        if cache.max_size_bytes == 0 {
            return Err(anyhow!("CHART_CACHE_MAX_BYTES must be > 0"));
        }
        if cache.max_items == 0 {
            return Err(anyhow!("CHART_CACHE_MAX_ITEMS must be > 0"));
        }

        let stats_log_interval_secs = parse_var("STATS_LOG_INTERVAL_SECS", 60u64)?;
        if stats_log_interval_secs == 0 {
            return Err(anyhow!("STATS_LOG_INTERVAL_SECS must be > 0"));
        }

        Ok(Self {
            symbols,
            feed: FeedConfig::from_env()?,
            cache,
            preload_on_start: env::var("PRELOAD_ON_START")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                .parse()
                .map_err(|_| anyhow!("PRELOAD_ON_START must be true or false"))?,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
            cache_namespace: env::var("CHART_CACHE_NAMESPACE")
                .unwrap_or(defaults.cache_namespace),
            yahoo_base_url: env::var("YAHOO_BASE_URL").unwrap_or(defaults.yahoo_base_url),
            stats_log_interval_secs,
        })
    }
}

/// Comma-separated symbols, trimmed, upper-cased and de-duplicated in order
fn parse_symbols(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbols() {
        assert_eq!(
            parse_symbols(" aapl, MSFT,,aapl ,brk.b "),
            vec!["AAPL", "MSFT", "BRK.B"]
        );
        assert!(parse_symbols(" , ").is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = WatchlistFeedConfig::default();
        assert!(config.preload_on_start);
        assert!(config.redis_url.is_none());
        assert_eq!(config.cache.max_items, 100);
        assert_eq!(config.feed.reconnect.max_attempts, 5);
    }
}
