pub mod store;

pub use store::{RedisKvStore, DEFAULT_NAMESPACE};
