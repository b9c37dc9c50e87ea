pub mod chart_cache;
pub mod clock;
pub mod store;

pub use chart_cache::{cache_key, CacheConfig, CacheRecord, CacheStats, ChartCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{KvStore, MemoryStore, StoreError};
