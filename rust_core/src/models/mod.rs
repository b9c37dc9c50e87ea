// Shared models for Tickerfeed services
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Connection & Feed Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Reconnecting,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Event delivered to feed subscribers.
///
/// `Price` only reaches callbacks registered for that symbol; `Status` and
/// `Error` are broadcast to every callback of every symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedEvent {
    Status {
        status: ConnectionStatus,
    },
    Price {
        symbol: String,
        price: f64,
        /// Percent change against the previous close
        change: f64,
    },
    Error {
        message: String,
    },
}

impl FeedEvent {
    pub fn is_status(&self) -> bool {
        matches!(self, FeedEvent::Status { .. })
    }

    pub fn is_price(&self) -> bool {
        matches!(self, FeedEvent::Price { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FeedEvent::Error { .. })
    }
}

// ============================================================================
// Quotes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuoteError {
    #[error("previous close for {symbol} is missing or zero ({previous_close})")]
    MissingBaseline { symbol: String, previous_close: f64 },
    #[error("last price for {symbol} is not a finite number ({price})")]
    InvalidPrice { symbol: String, price: f64 },
}

/// Latest price snapshot returned by an upstream price source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last_price: f64,
    pub previous_close: f64,
}

impl Quote {
    pub fn new(symbol: impl Into<String>, last_price: f64, previous_close: f64) -> Self {
        Self {
            symbol: symbol.into(),
            last_price,
            previous_close,
        }
    }

    /// Percent change vs previous close: (price - prev) / prev * 100.
    ///
    /// A zero or non-finite baseline is an error rather than an infinite change.
    pub fn percent_change(&self) -> Result<f64, QuoteError> {
        if !self.last_price.is_finite() {
            return Err(QuoteError::InvalidPrice {
                symbol: self.symbol.clone(),
                price: self.last_price,
            });
        }
        if !self.previous_close.is_finite() || self.previous_close == 0.0 {
            return Err(QuoteError::MissingBaseline {
                symbol: self.symbol.clone(),
                previous_close: self.previous_close,
            });
        }
        Ok((self.last_price - self.previous_close) / self.previous_close * 100.0)
    }
}

// ============================================================================
// Historical Series
// ============================================================================

/// One time-bucketed OHLCV observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvPoint {
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1m")]
    OneMonth,
    #[serde(rename = "3m")]
    ThreeMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "5y")]
    FiveYears,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] = [
        Timeframe::OneDay,
        Timeframe::OneWeek,
        Timeframe::OneMonth,
        Timeframe::ThreeMonths,
        Timeframe::OneYear,
        Timeframe::FiveYears,
    ];

    /// Coarse timeframes warmed by `ChartCache::preload_timeframes`
    pub const PRELOAD: [Timeframe; 3] = [
        Timeframe::OneDay,
        Timeframe::OneWeek,
        Timeframe::OneMonth,
    ];

    /// Name used in cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneDay => "1d",
            Timeframe::OneWeek => "1w",
            Timeframe::OneMonth => "1m",
            Timeframe::ThreeMonths => "3m",
            Timeframe::OneYear => "1y",
            Timeframe::FiveYears => "5y",
        }
    }

    /// Yahoo chart API (interval, range) for this timeframe
    pub fn interval_and_range(&self) -> (&'static str, &'static str) {
        match self {
            Timeframe::OneDay => ("5m", "1d"),
            Timeframe::OneWeek => ("30m", "5d"),
            Timeframe::OneMonth => ("1d", "1mo"),
            Timeframe::ThreeMonths => ("1d", "3mo"),
            Timeframe::OneYear => ("1d", "1y"),
            Timeframe::FiveYears => ("1wk", "5y"),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1d" => Ok(Timeframe::OneDay),
            "1w" => Ok(Timeframe::OneWeek),
            "1m" => Ok(Timeframe::OneMonth),
            "3m" => Ok(Timeframe::ThreeMonths),
            "1y" => Ok(Timeframe::OneYear),
            "5y" => Ok(Timeframe::FiveYears),
            other => Err(anyhow::anyhow!("Unknown timeframe: {}", other)),
        }
    }
}
