pub mod price_source;
pub mod yahoo;

// Re-export commonly used types
pub use price_source::{HistorySource, PriceSource};
pub use yahoo::YahooChartClient;
