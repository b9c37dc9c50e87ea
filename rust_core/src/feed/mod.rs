pub mod manager;
pub mod reconnect;
pub mod registry;

pub use manager::{FeedConfig, SubscriptionManager, CONNECTION_LOST_MESSAGE};
pub use reconnect::{ReconnectConfig, ReconnectStats, ReconnectStatsSnapshot};
pub use registry::{FeedCallback, SubscriptionHandle};
