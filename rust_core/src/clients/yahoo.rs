//! Yahoo Finance Chart API Client
//!
//! Provides latest quotes and historical OHLCV series from the public
//! v8 chart endpoint. No API key required.
//!
//! The base URL is configurable so requests can be routed through a proxy.

use super::price_source::{HistorySource, PriceSource};
use crate::models::{OhlcvPoint, Quote, Timeframe};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Yahoo chart client implementing PriceSource and HistorySource
pub struct YahooChartClient {
    client: Client,
    base_url: String,
}

impl YahooChartClient {
    /// Create a client against the public Yahoo endpoint
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a client against a custom base URL (proxy, mock server)
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Tickerfeed/1.0")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chart_url(&self, symbol: &str, interval: &str, range: &str) -> String {
        format!(
            "{}/{}?interval={}&range={}",
            self.base_url, symbol, interval, range
        )
    }

    async fn fetch_chart(&self, symbol: &str, interval: &str, range: &str) -> Result<ChartResult> {
        let url = self.chart_url(symbol, interval, range);
        debug!("Fetching {} ({} / {}) from Yahoo", symbol, interval, range);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch chart for {} from Yahoo", symbol))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Yahoo chart API error: {} - {}", status, body));
        }

        let envelope: ChartEnvelope = response
            .json()
            .await
            .context("Failed to parse Yahoo chart response")?;

        envelope.into_first_result(symbol)
    }
}

#[async_trait]
impl PriceSource for YahooChartClient {
    fn source_name(&self) -> &str {
        "Yahoo"
    }

    async fn latest_quote(&self, symbol: &str) -> Result<Quote> {
        let result = self.fetch_chart(symbol, "1m", "1d").await?;
        parse_quote(symbol, &result)
    }
}

#[async_trait]
impl HistorySource for YahooChartClient {
    async fn fetch_series(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<OhlcvPoint>> {
        let (interval, range) = timeframe.interval_and_range();
        let result = self.fetch_chart(symbol, interval, range).await?;
        let series = parse_series(&result)?;

        if series.is_empty() {
            return Err(anyhow!("No data received for {} ({})", symbol, timeframe));
        }
        Ok(series)
    }
}

/// Extract last price and previous close from chart metadata
fn parse_quote(symbol: &str, result: &ChartResult) -> Result<Quote> {
    let last_price = result
        .meta
        .regular_market_price
        .ok_or_else(|| anyhow!("Yahoo response for {} has no regularMarketPrice", symbol))?;

    let previous_close = result
        .meta
        .previous_close
        .or(result.meta.chart_previous_close)
        .ok_or_else(|| anyhow!("Yahoo response for {} has no previous close", symbol))?;

    Ok(Quote::new(symbol, last_price, previous_close))
}

/// Zip timestamps with the first quote block into OHLCV points
///
/// Missing open/high/low fall back to close, missing volume to 0.
/// Bars without a close are skipped.
fn parse_series(result: &ChartResult) -> Result<Vec<OhlcvPoint>> {
    let timestamps = match &result.timestamp {
        Some(ts) => ts,
        None => return Ok(Vec::new()),
    };

    let quote = result
        .indicators
        .quote
        .first()
        .ok_or_else(|| anyhow!("Yahoo response has no quote indicators"))?;

    let mut points = Vec::with_capacity(timestamps.len());
    for (index, ts) in timestamps.iter().enumerate() {
        let close = match value_at(&quote.close, index) {
            Some(c) => c,
            None => continue,
        };
        let date = match Utc.timestamp_opt(*ts, 0).single() {
            Some(d) => d,
            None => {
                warn!("Skipping bar with invalid timestamp {}", ts);
                continue;
            }
        };

        points.push(OhlcvPoint {
            date,
            open: value_at(&quote.open, index).unwrap_or(close),
            high: value_at(&quote.high, index).unwrap_or(close),
            low: value_at(&quote.low, index).unwrap_or(close),
            close,
            volume: value_at(&quote.volume, index).unwrap_or(0.0),
        });
    }

    Ok(points)
}

fn value_at(values: &[Option<f64>], index: usize) -> Option<f64> {
    values.get(index).copied().flatten()
}

/// Yahoo chart envelope: { "chart": { "result": [...], "error": ... } }
#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

impl ChartEnvelope {
    fn into_first_result(self, symbol: &str) -> Result<ChartResult> {
        if let Some(err) = self.chart.error {
            return Err(anyhow!(
                "Yahoo chart error for {}: {} - {}",
                symbol,
                err.code,
                err.description
            ));
        }
        self.chart
            .result
            .and_then(|results| results.into_iter().next())
            .ok_or_else(|| anyhow!("Yahoo chart response for {} has no result", symbol))
    }
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    #[serde(default)]
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    previous_close: Option<f64>,
    chart_previous_close: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<QuoteBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteBlock {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "chart": {
            "result": [{
                "meta": {
                    "regularMarketPrice": 189.5,
                    "chartPreviousClose": 185.0,
                    "previousClose": 187.0
                },
                "timestamp": [1700000000, 1700086400, 1700172800],
                "indicators": {
                    "quote": [{
                        "open":   [180.0, null, 186.0],
                        "high":   [182.0, 185.0, null],
                        "low":    [179.0, 183.0, 185.5],
                        "close":  [181.0, 184.0, null],
                        "volume": [1000, null, 3000]
                    }]
                }
            }],
            "error": null
        }
    }"#;

    fn sample_result() -> ChartResult {
        let envelope: ChartEnvelope = serde_json::from_str(SAMPLE).unwrap();
        envelope.into_first_result("AAPL").unwrap()
    }

    #[test]
    fn test_parse_quote_prefers_previous_close() {
        let quote = parse_quote("AAPL", &sample_result()).unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.last_price, 189.5);
        assert_eq!(quote.previous_close, 187.0);
    }

    #[test]
    fn test_parse_quote_falls_back_to_chart_previous_close() {
        let json = r#"{"chart":{"result":[{"meta":{"regularMarketPrice":10.0,"chartPreviousClose":8.0}}],"error":null}}"#;
        let envelope: ChartEnvelope = serde_json::from_str(json).unwrap();
        let result = envelope.into_first_result("X").unwrap();
        let quote = parse_quote("X", &result).unwrap();
        assert_eq!(quote.previous_close, 8.0);
    }

    #[test]
    fn test_parse_series_fills_gaps_and_skips_missing_close() {
        let series = parse_series(&sample_result()).unwrap();

        // Third bar has no close and is dropped
        assert_eq!(series.len(), 2);

        assert_eq!(series[0].open, 180.0);
        assert_eq!(series[0].volume, 1000.0);

        // Missing open and volume on the second bar
        assert_eq!(series[1].open, 184.0);
        assert_eq!(series[1].high, 185.0);
        assert_eq!(series[1].volume, 0.0);
        assert!(series[0].date < series[1].date);
    }

    #[test]
    fn test_chart_error_is_reported() {
        let json = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let envelope: ChartEnvelope = serde_json::from_str(json).unwrap();
        let err = envelope.into_first_result("ZZZZ").unwrap_err();
        assert!(err.to_string().contains("Not Found"));
    }

    #[test]
    fn test_chart_url() {
        let client = YahooChartClient::with_base_url("http://localhost:8080/chart/").unwrap();
        assert_eq!(
            client.chart_url("MSFT", "1d", "1mo"),
            "http://localhost:8080/chart/MSFT?interval=1d&range=1mo"
        );
        assert_eq!(client.source_name(), "Yahoo");
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_latest_quote() {
        let client = YahooChartClient::new().unwrap();
        let quote = client.latest_quote("AAPL").await.unwrap();
        assert!(quote.last_price > 0.0);
        assert!(quote.previous_close > 0.0);
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_fetch_series() {
        let client = YahooChartClient::new().unwrap();
        let series = client.fetch_series("AAPL", Timeframe::OneMonth).await.unwrap();
        assert!(!series.is_empty());
    }
}
