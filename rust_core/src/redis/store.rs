use crate::cache::{KvStore, StoreError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{aio::Connection, AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DEFAULT_NAMESPACE: &str = "tickerfeed";

/// Redis-backed `KvStore`. Each table is one hash at `{namespace}:{table}`.
#[derive(Clone)]
pub struct RedisKvStore {
    connection: Arc<Mutex<Connection>>,
    namespace: String,
}

impl RedisKvStore {
    pub async fn new(redis_url: &str, namespace: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("Invalid Redis URL")?;
        let connection = client
            .get_async_connection()
            .await
            .with_context(|| format!("Failed to connect to Redis at {}", redis_url))?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            namespace: namespace.to_string(),
        })
    }

    fn table_key(&self, table: &str) -> String {
        table_key(&self.namespace, table)
    }
}

fn table_key(namespace: &str, table: &str) -> String {
    format!("{}:{}", namespace, table)
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, table: &str, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.lock().await;
        Ok(conn.hget(self.table_key(table), key).await?)
    }

    async fn put(&self, table: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.lock().await;
        conn.hset::<_, _, _, ()>(self.table_key(table), key, value).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.lock().await;
        conn.hdel::<_, _, ()>(self.table_key(table), key).await?;
        Ok(())
    }

    async fn scan(&self, table: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut conn = self.connection.lock().await;
        let rows: HashMap<String, String> = conn.hgetall(self.table_key(table)).await?;
        Ok(rows.into_iter().collect())
    }

    async fn clear(&self, table: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.lock().await;
        conn.del::<_, ()>(self.table_key(table)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_key_is_namespaced() {
        assert_eq!(table_key("tickerfeed", "chart-data"), "tickerfeed:chart-data");
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_round_trip() {
        let store = RedisKvStore::new("redis://localhost:6379", "tickerfeed-test")
            .await
            .unwrap();
        store.clear("t").await.unwrap();

        store.put("t", "AAPL-1d", "{}").await.unwrap();
        assert_eq!(store.get("t", "AAPL-1d").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(store.scan("t").await.unwrap().len(), 1);

        store.delete("t", "AAPL-1d").await.unwrap();
        assert!(store.get("t", "AAPL-1d").await.unwrap().is_none());
        store.clear("t").await.unwrap();
    }
}
