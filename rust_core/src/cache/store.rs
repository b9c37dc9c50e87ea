//! Key/value storage behind the chart cache.
//!
//! Records live in named tables; the cache uses one table for series
//! records and a second one for its statistics snapshot.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable keyed storage with full-table enumeration
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, table: &str, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, table: &str, key: &str, value: &str) -> Result<(), StoreError>;

    async fn delete(&self, table: &str, key: &str) -> Result<(), StoreError>;

    /// All (key, value) pairs of a table, in no particular order
    async fn scan(&self, table: &str) -> Result<Vec<(String, String)>, StoreError>;

    async fn clear(&self, table: &str) -> Result<(), StoreError>;
}

/// In-process store. Can be switched offline to simulate backend failures.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, HashMap<String, String>>>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of keys in a table
    pub fn len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.len())
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, table: &str, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|t| t.get(key))
            .cloned())
    }

    async fn put(&self, table: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, table: &str, key: &str) -> Result<(), StoreError> {
        self.check()?;
        if let Some(t) = self.tables.write().get_mut(table) {
            t.remove(key);
        }
        Ok(())
    }

    async fn scan(&self, table: &str) -> Result<Vec<(String, String)>, StoreError> {
        self.check()?;
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn clear(&self, table: &str) -> Result<(), StoreError> {
        self.check()?;
        self.tables.write().remove(table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tables_are_separate() {
        let store = MemoryStore::new();
        store.put("a", "k", "1").await.unwrap();
        store.put("b", "k", "2").await.unwrap();

        assert_eq!(store.get("a", "k").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("b", "k").await.unwrap().as_deref(), Some("2"));

        store.clear("a").await.unwrap();
        assert!(store.get("a", "k").await.unwrap().is_none());
        assert_eq!(store.len("b"), 1);
    }

    #[tokio::test]
    async fn test_delete_and_scan() {
        let store = MemoryStore::new();
        store.put("t", "x", "1").await.unwrap();
        store.put("t", "y", "2").await.unwrap();
        store.delete("t", "x").await.unwrap();
        store.delete("missing", "x").await.unwrap();

        let rows = store.scan("t").await.unwrap();
        assert_eq!(rows, vec![("y".to_string(), "2".to_string())]);
    }

    #[tokio::test]
    async fn test_offline_store_errors() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.put("t", "k", "v").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.scan("t").await.is_err());

        store.set_available(true);
        assert!(store.put("t", "k", "v").await.is_ok());
    }
}
