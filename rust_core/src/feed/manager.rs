//! Live price subscription manager
//!
//! Multiplexes any number of subscribers onto one logical feed per symbol,
//! pulling latest prices from a `PriceSource` and pushing typed events back
//! through per-symbol callbacks.
//!
//! Connection state machine:
//! - disconnected -> connected: first successful fetch
//! - connected -> reconnecting: no message within the staleness threshold
//! - reconnecting -> connected: a resubscription fetch delivered a price
//! - reconnecting -> disconnected: attempts exhausted, error broadcast, no more retries
//!
//! The state lock is never held across an await or while a callback runs.

use super::reconnect::{ReconnectConfig, ReconnectStats, ReconnectStatsSnapshot};
use super::registry::{FeedCallback, RemoveOutcome, SubscriptionHandle, SubscriptionRegistry};
use crate::clients::PriceSource;
use crate::env::parse_var;
use crate::models::{ConnectionStatus, FeedEvent, Quote};
use anyhow::{anyhow, Result};
use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Message broadcast once reconnection attempts are exhausted
pub const CONNECTION_LOST_MESSAGE: &str = "Connection lost. Please refresh the page.";

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Period of the liveness check
    pub health_check_interval: Duration,
    /// Max time without a processed message before the feed is considered dead
    pub staleness_threshold: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(5),
            staleness_threshold: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl FeedConfig {
    pub fn from_env() -> Result<Self> {
        let health_check_ms: u64 = parse_var("FEED_HEALTH_CHECK_INTERVAL_MS", 5000)?;
        let staleness_ms: u64 = parse_var("FEED_STALENESS_THRESHOLD_MS", 10000)?;

        if health_check_ms == 0 {
            return Err(anyhow!("FEED_HEALTH_CHECK_INTERVAL_MS must be > 0"));
        }

        Ok(Self {
            health_check_interval: Duration::from_millis(health_check_ms),
            staleness_threshold: Duration::from_millis(staleness_ms),
            reconnect: ReconnectConfig::from_env()?,
        })
    }
}

struct FeedState {
    registry: SubscriptionRegistry,
    status: ConnectionStatus,
    reconnect_attempts: u32,
    /// Set once attempts run out; automatic reconnection stays off afterwards
    exhausted: bool,
    shut_down: bool,
    last_message_at: Instant,
    last_quotes: FxHashMap<String, Quote>,
    /// In-flight per-symbol work (initial fetch), cancelled on last unsubscribe
    symbol_tasks: FxHashMap<String, JoinHandle<()>>,
    health_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

struct Inner {
    source: Arc<dyn PriceSource>,
    config: FeedConfig,
    state: Mutex<FeedState>,
    stats: ReconnectStats,
}

enum ReconnectStep {
    Wait { delay: Duration, attempt: u32 },
    Recovered,
    GiveUp,
    Stopped,
}

enum Resubscribe {
    Recovered,
    Failed,
    NoSymbols,
}

/// Price feed fan-out with liveness checking and bounded reconnection.
///
/// Cheap to clone; clones share state. Must be started inside a tokio runtime.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    /// Create the manager and start its liveness check
    pub fn start(source: Arc<dyn PriceSource>, config: FeedConfig) -> Self {
        info!(
            "Starting price feed from {} (health check {:?}, staleness {:?}, max reconnects {})",
            source.source_name(),
            config.health_check_interval,
            config.staleness_threshold,
            config.reconnect.max_attempts
        );

        let interval = config.health_check_interval;
        let inner = Arc::new(Inner {
            source,
            config,
            state: Mutex::new(FeedState {
                registry: SubscriptionRegistry::new(),
                status: ConnectionStatus::Disconnected,
                reconnect_attempts: 0,
                exhausted: false,
                shut_down: false,
                last_message_at: Instant::now(),
                last_quotes: FxHashMap::default(),
                symbol_tasks: FxHashMap::default(),
                health_task: None,
                reconnect_task: None,
            }),
            stats: ReconnectStats::default(),
        });

        let health = tokio::spawn(health_check_loop(Arc::downgrade(&inner), interval));
        inner.state.lock().health_task = Some(health);

        Self { inner }
    }

    /// Register `callback` for `symbol`.
    ///
    /// The callback synchronously receives the current connection status
    /// before any other event. The first subscriber of a symbol triggers a
    /// background fetch of its latest price.
    pub fn subscribe<F>(&self, symbol: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&FeedEvent) + Send + Sync + 'static,
    {
        self.subscribe_callback(symbol, Arc::new(callback))
    }

    pub fn subscribe_callback(&self, symbol: &str, callback: FeedCallback) -> SubscriptionHandle {
        let (handle, first, mut delivered, shut_down) = {
            let mut state = self.inner.state.lock();
            let (handle, first) = state.registry.insert(symbol, callback.clone());
            if state.shut_down {
                state.registry.remove(&handle);
            }
            (handle, first, state.status, state.shut_down)
        };

        callback(&FeedEvent::Status { status: delivered });

        if shut_down {
            warn!("subscribe({}) called after cleanup; ignoring", symbol);
            return handle;
        }

        // Prime only once the delivered status matches the current one, so a
        // transition racing the initial event is not lost.
        loop {
            let current = {
                let mut state = self.inner.state.lock();
                if !state.registry.contains(&handle) {
                    // Unsubscribed from inside its own initial callback
                    return handle;
                }
                if state.status == delivered {
                    state.registry.prime(&handle);
                    break;
                }
                state.status
            };
            callback(&FeedEvent::Status { status: current });
            delivered = current;
        }

        debug!("Subscribed {}", handle);

        if first {
            let inner = self.inner.clone();
            let owned_symbol = symbol.to_string();
            let task = tokio::spawn(async move {
                inner.fetch_and_process(&owned_symbol).await;
            });

            let mut state = self.inner.state.lock();
            if state.shut_down || !state.registry.has_symbol(symbol) {
                task.abort();
            } else if let Some(previous) = state.symbol_tasks.insert(symbol.to_string(), task) {
                previous.abort();
            }
        }

        handle
    }

    /// Remove a subscription. Idempotent.
    ///
    /// Removing the last callback of a symbol drops the symbol and cancels
    /// its in-flight work.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let cancelled = {
            let mut state = self.inner.state.lock();
            match state.registry.remove(handle) {
                RemoveOutcome::RemovedLast => {
                    state.last_quotes.remove(handle.symbol());
                    state.symbol_tasks.remove(handle.symbol())
                }
                RemoveOutcome::Removed => None,
                RemoveOutcome::NotFound => return,
            }
        };

        if let Some(task) = cancelled {
            task.abort();
            debug!("Cancelled pending work for {}", handle.symbol());
        }
        debug!("Unsubscribed {}", handle);
    }

    /// Full teardown: stops the liveness check, cancels every task and clears
    /// all registries. The instance is inert afterwards.
    pub fn cleanup(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut state = self.inner.state.lock();
            state.shut_down = true;
            state.registry.clear();
            state.last_quotes.clear();

            let mut tasks: Vec<JoinHandle<()>> =
                state.symbol_tasks.drain().map(|(_, task)| task).collect();
            tasks.extend(state.health_task.take());
            tasks.extend(state.reconnect_task.take());
            tasks
        };

        let count = tasks.len();
        for task in tasks {
            task.abort();
        }
        info!("Price feed cleaned up ({} tasks cancelled)", count);
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().reconnect_attempts
    }

    /// True once reconnection was abandoned
    pub fn is_exhausted(&self) -> bool {
        self.inner.state.lock().exhausted
    }

    pub fn subscribed_symbols(&self) -> Vec<String> {
        let mut symbols = self.inner.state.lock().registry.symbols();
        symbols.sort();
        symbols
    }

    pub fn subscriber_count(&self, symbol: &str) -> usize {
        self.inner.state.lock().registry.subscriber_count(symbol)
    }

    /// Last quote processed for a subscribed symbol
    pub fn last_quote(&self, symbol: &str) -> Option<Quote> {
        self.inner.state.lock().last_quotes.get(symbol).cloned()
    }

    pub fn stats(&self) -> ReconnectStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl Inner {
    /// Fetch and fan out one symbol's latest price. Failures are logged only.
    async fn fetch_and_process(&self, symbol: &str) -> bool {
        match self.source.latest_quote(symbol).await {
            Ok(quote) => self.process_quote(quote),
            Err(e) => {
                error!("Error fetching price for {}: {:#}", symbol, e);
                false
            }
        }
    }

    /// Deliver a quote to its symbol's subscribers. Returns true when the
    /// quote was accepted as a live message.
    fn process_quote(&self, quote: Quote) -> bool {
        let change = match quote.percent_change() {
            Ok(change) => change,
            Err(e) => {
                warn!("Dropping price update: {}", e);
                return false;
            }
        };

        let (handles, became_connected) = {
            let mut state = self.state.lock();
            if state.shut_down || !state.registry.has_symbol(&quote.symbol) {
                debug!("Dropping price for unsubscribed symbol {}", quote.symbol);
                return false;
            }

            state.last_message_at = Instant::now();
            let handles = state.registry.handles_for(&quote.symbol);
            state.last_quotes.insert(quote.symbol.clone(), quote.clone());

            let became_connected = !state.exhausted && state.status != ConnectionStatus::Connected;
            if became_connected {
                state.status = ConnectionStatus::Connected;
                state.reconnect_attempts = 0;
            }
            (handles, became_connected)
        };

        if became_connected {
            info!("Price feed connected");
            self.broadcast(&FeedEvent::Status {
                status: ConnectionStatus::Connected,
            });
        }

        let event = FeedEvent::Price {
            symbol: quote.symbol,
            price: quote.last_price,
            change,
        };
        self.deliver(&handles, &event);
        true
    }

    /// Invoke each still-registered callback in order, outside the lock
    fn deliver(&self, handles: &[SubscriptionHandle], event: &FeedEvent) {
        for handle in handles {
            let callback = self.state.lock().registry.get(handle);
            if let Some(callback) = callback {
                callback(event);
            }
        }
    }

    fn broadcast(&self, event: &FeedEvent) {
        let handles = self.state.lock().registry.all_handles();
        self.deliver(&handles, event);
    }

    fn check_connection(self: &Arc<Self>) {
        let stale_for = {
            let state = self.state.lock();
            if state.shut_down
                || state.exhausted
                || state.status != ConnectionStatus::Connected
                || state.registry.is_empty()
            {
                return;
            }
            let elapsed = state.last_message_at.elapsed();
            if elapsed <= self.config.staleness_threshold {
                return;
            }
            elapsed
        };

        warn!(
            "No messages received for {:?}, initiating reconnection...",
            stale_for
        );
        self.start_reconnect();
    }

    fn start_reconnect(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.shut_down || state.exhausted || state.status != ConnectionStatus::Connected {
                return;
            }
            state.status = ConnectionStatus::Reconnecting;
        }

        // Subscribers observe the transition before any retry runs
        self.broadcast(&FeedEvent::Status {
            status: ConnectionStatus::Reconnecting,
        });

        let task = tokio::spawn(reconnect_loop(Arc::downgrade(self)));
        let mut state = self.state.lock();
        if state.shut_down {
            task.abort();
        } else {
            state.reconnect_task = Some(task);
        }
    }

    fn next_reconnect_step(&self) -> ReconnectStep {
        let mut state = self.state.lock();
        if state.shut_down {
            return ReconnectStep::Stopped;
        }
        if state.status == ConnectionStatus::Connected {
            return ReconnectStep::Recovered;
        }
        if state.reconnect_attempts >= self.config.reconnect.max_attempts {
            state.exhausted = true;
            state.status = ConnectionStatus::Disconnected;
            state.reconnect_task = None;
            return ReconnectStep::GiveUp;
        }

        let delay = self.config.reconnect.calculate_delay(state.reconnect_attempts);
        state.reconnect_attempts += 1;
        ReconnectStep::Wait {
            delay,
            attempt: state.reconnect_attempts,
        }
    }

    /// Re-issue the latest-price fetch for every subscribed symbol
    async fn resubscribe_all(&self) -> Resubscribe {
        let symbols = self.state.lock().registry.symbols();
        if symbols.is_empty() {
            return Resubscribe::NoSymbols;
        }

        debug!("Resubscribing {} symbols", symbols.len());
        join_all(symbols.iter().map(|symbol| self.fetch_and_process(symbol))).await;

        if self.state.lock().status == ConnectionStatus::Connected {
            Resubscribe::Recovered
        } else {
            Resubscribe::Failed
        }
    }

    fn finish_reconnect(&self) {
        self.state.lock().reconnect_task = None;
    }

    fn go_idle(&self) {
        {
            let mut state = self.state.lock();
            state.status = ConnectionStatus::Disconnected;
            state.reconnect_attempts = 0;
            state.reconnect_task = None;
        }
        info!("No subscribed symbols left, price feed idle");
        self.broadcast(&FeedEvent::Status {
            status: ConnectionStatus::Disconnected,
        });
    }

    fn give_up(&self) {
        error!("Max reconnection attempts reached");
        self.broadcast(&FeedEvent::Status {
            status: ConnectionStatus::Disconnected,
        });
        self.broadcast(&FeedEvent::Error {
            message: CONNECTION_LOST_MESSAGE.to_string(),
        });
    }
}

async fn health_check_loop(inner: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match inner.upgrade() {
            Some(inner) => inner.check_connection(),
            None => return,
        }
    }
}

/// Sequential reconnect attempts; at most one loop runs per manager
async fn reconnect_loop(inner: Weak<Inner>) {
    loop {
        let delay = {
            let inner = match inner.upgrade() {
                Some(inner) => inner,
                None => return,
            };
            match inner.next_reconnect_step() {
                ReconnectStep::Wait { delay, attempt } => {
                    info!(
                        "Attempting to reconnect in {:?} (attempt {}/{})",
                        delay, attempt, inner.config.reconnect.max_attempts
                    );
                    inner.stats.record_attempt();
                    delay
                }
                ReconnectStep::Recovered => {
                    inner.finish_reconnect();
                    return;
                }
                ReconnectStep::GiveUp => {
                    inner.give_up();
                    return;
                }
                ReconnectStep::Stopped => return,
            }
        };

        tokio::time::sleep(delay).await;

        let inner = match inner.upgrade() {
            Some(inner) => inner,
            None => return,
        };
        match inner.resubscribe_all().await {
            Resubscribe::Recovered => {
                inner.stats.record_success();
                info!(
                    "Reconnected (total reconnects: {})",
                    inner.stats.snapshot().successful_reconnects
                );
                inner.finish_reconnect();
                return;
            }
            Resubscribe::NoSymbols => {
                inner.go_idle();
                return;
            }
            Resubscribe::Failed => {
                inner.stats.record_failure();
                warn!(
                    "Reconnection attempt failed ({} consecutive)",
                    inner.stats.get_consecutive_failures()
                );
            }
        }
    }
}
