//! Tickerfeed Core - live watchlist prices and cached chart history.
//!
//! This crate provides:
//! - Per-symbol price subscriptions with fan-out to multiple callbacks
//! - Connection status tracking with staleness detection
//! - Bounded exponential-backoff reconnection
//! - A size- and count-bounded chart series cache with LRU eviction
//! - Yahoo Finance chart client and Redis-backed cache storage

pub mod cache;
pub mod clients;
pub mod env;
pub mod feed;
pub mod models;
pub mod redis;

pub use cache::{CacheConfig, CacheStats, ChartCache};
pub use feed::{FeedConfig, SubscriptionHandle, SubscriptionManager};
pub use models::{ConnectionStatus, FeedEvent, OhlcvPoint, Quote, Timeframe};
