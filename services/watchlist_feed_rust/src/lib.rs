//! watchlist_feed_rust - keeps a watchlist subscribed to live prices and
//! its chart history warm in the cache

pub mod config;
pub mod service;

pub use config::WatchlistFeedConfig;
pub use service::WatchlistFeed;
