//! Market Data Source Traits
//!
//! Defines the upstream interfaces the feed manager and chart cache pull from.
//! Implementations include the Yahoo chart client; tests use in-memory fakes.

use crate::models::{OhlcvPoint, Quote, Timeframe};
use anyhow::Result;
use async_trait::async_trait;

/// Source of the latest price for a symbol
///
/// Implementations must be Send + Sync: the feed manager calls them from
/// spawned tasks.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Get the source's display name (e.g., "Yahoo")
    fn source_name(&self) -> &str;

    /// Get last price and previous close for a single symbol
    ///
    /// # Returns
    /// * `Ok(Quote)` - Latest price data
    /// * `Err` - Transport, HTTP or parse failure
    async fn latest_quote(&self, symbol: &str) -> Result<Quote>;
}

/// Source of historical OHLCV series
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch the ordered series for `(symbol, timeframe)`
    ///
    /// Failures are returned to the caller unchanged; a missing series is
    /// user-visible.
    async fn fetch_series(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<OhlcvPoint>>;
}
