//! Bounded, persistent cache of historical chart series.
//!
//! One record per (symbol, timeframe). Records expire after a fixed age and
//! the store is held under a byte budget and an item budget by evicting the
//! least recently accessed records. Running hit/miss/size/count statistics
//! are kept in memory and persisted after every mutation.
//!
//! Storage failures never reach callers of `get`/`set`: reads degrade to a
//! miss and writes are dropped after logging.

use super::clock::Clock;
use super::store::KvStore;
use crate::clients::HistorySource;
use crate::env::parse_var;
use crate::models::{OhlcvPoint, Timeframe};
use anyhow::{Context, Result};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const RECORDS_TABLE: &str = "chart-data";
pub const STATS_TABLE: &str = "cache-stats";
const STATS_KEY: &str = "stats";

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Age after which a record is treated as absent (default: 5 minutes)
    pub expiry: Duration,
    /// Byte budget across all records (default: 50 MiB)
    pub max_size_bytes: u64,
    /// Item budget (default: 100)
    pub max_items: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiry: Duration::from_secs(5 * 60),
            max_size_bytes: 50 * 1024 * 1024,
            max_items: 100,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            expiry: Duration::from_secs(parse_var(
                "CHART_CACHE_EXPIRY_SECS",
                defaults.expiry.as_secs(),
            )?),
            max_size_bytes: parse_var("CHART_CACHE_MAX_BYTES", defaults.max_size_bytes)?,
            max_items: parse_var("CHART_CACHE_MAX_ITEMS", defaults.max_items)?,
        })
    }
}

/// Store key for a (symbol, timeframe) pair
pub fn cache_key(symbol: &str, timeframe: Timeframe) -> String {
    format!("{}-{}", symbol, timeframe)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub data: Vec<OhlcvPoint>,
    /// Write time (epoch ms); never changed by reads
    pub timestamp: i64,
    pub last_accessed: i64,
    /// Serialized size measured once at write time
    pub size: u64,
}

impl CacheRecord {
    /// Build a record stamped at `now_ms` with its size measured
    pub fn new(
        symbol: &str,
        timeframe: Timeframe,
        data: Vec<OhlcvPoint>,
        now_ms: i64,
    ) -> Result<Self> {
        let mut record = Self {
            symbol: symbol.to_string(),
            timeframe,
            data,
            timestamp: now_ms,
            last_accessed: now_ms,
            size: 0,
        };
        record.size = serde_json::to_vec(&record)
            .context("Failed to measure cache record")?
            .len() as u64;
        Ok(record)
    }

    pub fn key(&self) -> String {
        cache_key(&self.symbol, self.timeframe)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_size: u64,
    pub item_count: u64,
}

impl CacheStats {
    fn add_record(&mut self, size: u64) {
        self.total_size += size;
        self.item_count += 1;
    }

    fn remove_record(&mut self, size: u64) {
        self.total_size = self.total_size.saturating_sub(size);
        self.item_count = self.item_count.saturating_sub(1);
    }

    /// Hit ratio in [0, 1]; 0 when nothing has been looked up
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

pub struct ChartCache {
    store: Arc<dyn KvStore>,
    history: Arc<dyn HistorySource>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    stats: Mutex<CacheStats>,
    /// Serializes get/set/clear so eviction and accounting see a consistent store
    op_lock: tokio::sync::Mutex<()>,
}

impl ChartCache {
    /// Open the cache over `store`, restoring persisted statistics and
    /// reconciling size/count against the records actually present.
    pub async fn open(
        store: Arc<dyn KvStore>,
        history: Arc<dyn HistorySource>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        let cache = Self {
            store,
            history,
            clock,
            config,
            stats: Mutex::new(CacheStats::default()),
            op_lock: tokio::sync::Mutex::new(()),
        };

        if let Err(e) = cache.restore_stats().await {
            warn!("Error loading cache stats, starting empty: {:#}", e);
        }

        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Cached series for (symbol, timeframe), or `None` on miss, expiry or
    /// storage failure
    pub async fn get(&self, symbol: &str, timeframe: Timeframe) -> Option<Vec<OhlcvPoint>> {
        let _guard = self.op_lock.lock().await;

        match self.lookup(symbol, timeframe).await {
            Ok(found) => found,
            Err(e) => {
                error!("Error reading {} from cache: {:#}", cache_key(symbol, timeframe), e);
                self.stats.lock().misses += 1;
                self.persist_stats().await;
                None
            }
        }
    }

    /// Store a series, evicting older records first if the budgets require it
    pub async fn set(&self, symbol: &str, timeframe: Timeframe, data: &[OhlcvPoint]) {
        let _guard = self.op_lock.lock().await;

        if let Err(e) = self.insert(symbol, timeframe, data).await {
            error!("Error writing {} to cache: {:#}", cache_key(symbol, timeframe), e);
        }
    }

    /// Cached series if present, otherwise fetched from the history source
    /// and cached. Fetch errors propagate.
    pub async fn get_or_fetch(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<OhlcvPoint>> {
        if let Some(data) = self.get(symbol, timeframe).await {
            return Ok(data);
        }

        let data = self
            .history
            .fetch_series(symbol, timeframe)
            .await
            .with_context(|| format!("Failed to fetch {} {} series", symbol, timeframe))?;

        self.set(symbol, timeframe, &data).await;
        Ok(data)
    }

    /// Warm the cache with the common timeframes for a symbol
    pub async fn preload_timeframes(&self, symbol: &str) -> Result<()> {
        let results = join_all(
            Timeframe::PRELOAD
                .iter()
                .map(|tf| self.get_or_fetch(symbol, *tf)),
        )
        .await;

        let mut first_error = None;
        for (timeframe, result) in Timeframe::PRELOAD.iter().zip(results) {
            match result {
                Ok(data) => debug!("Preloaded {} {} ({} points)", symbol, timeframe, data.len()),
                Err(e) => {
                    warn!("Preload of {} {} failed: {:#}", symbol, timeframe, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn get_stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    /// Remove every record and reset all statistics
    pub async fn clear(&self) {
        let _guard = self.op_lock.lock().await;

        if let Err(e) = self.store.clear(RECORDS_TABLE).await {
            error!("Error clearing cache: {}", e);
            return;
        }

        *self.stats.lock() = CacheStats::default();
        self.persist_stats().await;
        info!("Chart cache cleared");
    }

    async fn lookup(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Vec<OhlcvPoint>>> {
        let key = cache_key(symbol, timeframe);
        let now = self.clock.now_ms();

        let record = match self.store.get(RECORDS_TABLE, &key).await? {
            Some(raw) => match serde_json::from_str::<CacheRecord>(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Dropping undecodable cache record {}: {}", key, e);
                    self.drop_undecodable(&key).await?;
                    None
                }
            },
            None => None,
        };

        let found = match record {
            Some(mut record) if !self.is_expired(&record, now) => {
                record.last_accessed = now;
                let payload = serde_json::to_string(&record)?;
                self.store.put(RECORDS_TABLE, &key, &payload).await?;
                self.stats.lock().hits += 1;
                debug!("Cache hit {}", key);
                Some(record.data)
            }
            Some(record) => {
                self.store.delete(RECORDS_TABLE, &key).await?;
                let mut stats = self.stats.lock();
                stats.remove_record(record.size);
                stats.misses += 1;
                debug!("Cache entry {} expired", key);
                None
            }
            None => {
                self.stats.lock().misses += 1;
                None
            }
        };

        self.persist_stats().await;
        Ok(found)
    }

    async fn insert(&self, symbol: &str, timeframe: Timeframe, data: &[OhlcvPoint]) -> Result<()> {
        let record = CacheRecord::new(symbol, timeframe, data.to_vec(), self.clock.now_ms())?;
        let key = record.key();

        // Replacing a key releases the old record's share of the budgets first
        if let Some(raw) = self.store.get(RECORDS_TABLE, &key).await? {
            match serde_json::from_str::<CacheRecord>(&raw) {
                Ok(old) => {
                    self.store.delete(RECORDS_TABLE, &key).await?;
                    self.stats.lock().remove_record(old.size);
                }
                Err(e) => {
                    warn!("Replacing undecodable cache record {}: {}", key, e);
                    self.drop_undecodable(&key).await?;
                }
            }
        }

        let needs_room = {
            let stats = self.stats.lock();
            stats.total_size + record.size > self.config.max_size_bytes
                || stats.item_count + 1 > self.config.max_items
        };
        if needs_room {
            self.evict_for(record.size).await?;
        }

        let payload = serde_json::to_string(&record)?;
        self.store.put(RECORDS_TABLE, &key, &payload).await?;
        self.stats.lock().add_record(record.size);
        debug!("Cached {} ({} points, {} bytes)", key, record.data.len(), record.size);

        self.persist_stats().await;
        Ok(())
    }

    /// Evict least recently accessed records until a record of
    /// `required_bytes` fits both budgets, or the store is empty.
    async fn evict_for(&self, required_bytes: u64) -> Result<()> {
        let mut records = self.load_records().await?;
        records.sort_by(|(a_key, a), (b_key, b)| {
            a.last_accessed
                .cmp(&b.last_accessed)
                .then(a.timestamp.cmp(&b.timestamp))
                .then_with(|| a_key.cmp(b_key))
        });

        let mut evicted = 0usize;
        let mut freed = 0u64;
        for (key, record) in records {
            let fits = {
                let stats = self.stats.lock();
                stats.total_size + required_bytes <= self.config.max_size_bytes
                    && stats.item_count + 1 <= self.config.max_items
            };
            if fits {
                break;
            }

            self.store.delete(RECORDS_TABLE, &key).await?;
            self.stats.lock().remove_record(record.size);
            evicted += 1;
            freed += record.size;
        }

        if evicted > 0 {
            info!("Evicted {} cached series ({} bytes)", evicted, freed);
        }
        Ok(())
    }

    /// Decode every stored record, deleting any that fail to decode, and
    /// set size/count from what remains.
    async fn load_records(&self) -> Result<Vec<(String, CacheRecord)>> {
        let mut records = Vec::new();
        for (key, raw) in self.store.scan(RECORDS_TABLE).await? {
            match serde_json::from_str::<CacheRecord>(&raw) {
                Ok(record) => records.push((key, record)),
                Err(e) => {
                    warn!("Dropping undecodable cache record {}: {}", key, e);
                    self.store.delete(RECORDS_TABLE, &key).await?;
                }
            }
        }

        let total_size = records.iter().map(|(_, r)| r.size).sum();
        let item_count = records.len() as u64;
        let mut stats = self.stats.lock();
        stats.total_size = total_size;
        stats.item_count = item_count;

        Ok(records)
    }

    /// Delete a record whose size cannot be read back, then recount the
    /// aggregates from the store. A failed recount is logged and the
    /// aggregates fall back to the pre-delete values minus one item.
    async fn drop_undecodable(&self, key: &str) -> Result<()> {
        self.store.delete(RECORDS_TABLE, key).await?;
        if let Err(e) = self.load_records().await {
            warn!("Error recounting cache after dropping {}: {:#}", key, e);
            self.stats.lock().remove_record(0);
        }
        Ok(())
    }

    async fn restore_stats(&self) -> Result<()> {
        if let Some(raw) = self.store.get(STATS_TABLE, STATS_KEY).await? {
            match serde_json::from_str::<CacheStats>(&raw) {
                Ok(saved) => {
                    *self.stats.lock() = saved;
                }
                Err(e) => warn!("Ignoring undecodable cache stats: {}", e),
            }
        }

        let saved = self.get_stats();
        self.load_records().await?;
        let current = self.get_stats();
        if saved.total_size != current.total_size || saved.item_count != current.item_count {
            info!(
                "Reconciled cache stats: {} items / {} bytes (was {} / {})",
                current.item_count, current.total_size, saved.item_count, saved.total_size
            );
            self.persist_stats().await;
        }
        Ok(())
    }

    async fn persist_stats(&self) {
        let snapshot = self.get_stats();
        let payload = match serde_json::to_string(&snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Error encoding cache stats: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.put(STATS_TABLE, STATS_KEY, &payload).await {
            warn!("Error persisting cache stats: {}", e);
        }
    }

    fn is_expired(&self, record: &CacheRecord, now_ms: i64) -> bool {
        now_ms - record.timestamp > self.config.expiry.as_millis() as i64
    }
}
