//! Reconnection policy for the price feed
//!
//! Bounded exponential backoff and counters for monitoring reconnect
//! behaviour. The feed manager owns one `ReconnectStats` per instance.

use crate::env::parse_var;
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Configuration for reconnection behavior
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    /// Attempts allowed per outage before giving up (default: 5)
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff (default: 1000ms)
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (default: 60000ms = 1 minute)
    pub max_delay_ms: u64,
    /// Jitter percentage to spread retries (default: 0.0 = none)
    pub jitter_pct: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 60000,
            jitter_pct: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to defaults; malformed ones are rejected.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            max_attempts: parse_var("FEED_RECONNECT_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_delay_ms: parse_var("FEED_RECONNECT_BASE_DELAY_MS", defaults.base_delay_ms)?,
            max_delay_ms: parse_var("FEED_RECONNECT_MAX_DELAY_MS", defaults.max_delay_ms)?,
            jitter_pct: parse_var("FEED_RECONNECT_JITTER_PCT", defaults.jitter_pct)?,
        };

        if !(0.0..=1.0).contains(&config.jitter_pct) {
            return Err(anyhow!("FEED_RECONNECT_JITTER_PCT must be between 0 and 1"));
        }
        if config.max_delay_ms < config.base_delay_ms {
            return Err(anyhow!(
                "FEED_RECONNECT_MAX_DELAY_MS must be >= FEED_RECONNECT_BASE_DELAY_MS"
            ));
        }
        Ok(config)
    }

    /// Backoff before the attempt numbered `attempt` (0-based): base * 2^attempt
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay_ms as f64;
        let exponential_ms = base_ms * 2f64.powi(attempt.min(62) as i32);
        let capped_ms = exponential_ms.min(self.max_delay_ms as f64);

        // Add jitter: ±jitter_pct%
        let jitter_range = capped_ms * self.jitter_pct;
        let jitter = if jitter_range > 0.0 {
            (rand::random::<f64>() * 2.0 - 1.0) * jitter_range
        } else {
            0.0
        };
        let final_ms = (capped_ms + jitter).max(0.0);

        Duration::from_millis(final_ms as u64)
    }
}

/// Statistics for monitoring reconnection behavior
#[derive(Debug, Default)]
pub struct ReconnectStats {
    /// Total reconnection attempts
    pub reconnect_attempts: AtomicU64,
    /// Successful reconnections
    pub successful_reconnects: AtomicU64,
    /// Failed reconnection attempts
    pub failed_reconnects: AtomicU64,
    /// Current consecutive failures
    pub consecutive_failures: AtomicU32,
}

impl ReconnectStats {
    pub fn record_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful_reconnects.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_reconnects.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ReconnectStatsSnapshot {
        ReconnectStatsSnapshot {
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            successful_reconnects: self.successful_reconnects.load(Ordering::Relaxed),
            failed_reconnects: self.failed_reconnects.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectStatsSnapshot {
    pub reconnect_attempts: u64,
    pub successful_reconnects: u64,
    pub failed_reconnects: u64,
    pub consecutive_failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let config = ReconnectConfig {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 60000,
            jitter_pct: 0.0, // No jitter for predictable testing
        };

        assert_eq!(config.calculate_delay(0), Duration::from_millis(1000)); // 1 * 2^0 = 1s
        assert_eq!(config.calculate_delay(1), Duration::from_millis(2000));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(4000));
        assert_eq!(config.calculate_delay(4), Duration::from_millis(16000));
        assert_eq!(config.calculate_delay(5), Duration::from_millis(32000));
        assert_eq!(config.calculate_delay(6), Duration::from_millis(60000)); // Capped at max
        assert_eq!(config.calculate_delay(100), Duration::from_millis(60000)); // Still capped
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = ReconnectConfig {
            jitter_pct: 0.1,
            ..ReconnectConfig::default()
        };

        for _ in 0..50 {
            let delay = config.calculate_delay(1).as_millis();
            assert!((1800..=2200).contains(&delay), "delay out of range: {}", delay);
        }
    }

    #[test]
    fn test_from_env_rejects_malformed_values() {
        std::env::set_var("FEED_RECONNECT_MAX_ATTEMPTS", "lots");
        let err = ReconnectConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("FEED_RECONNECT_MAX_ATTEMPTS"));
        std::env::remove_var("FEED_RECONNECT_MAX_ATTEMPTS");
    }

    #[test]
    fn test_stats() {
        let stats = ReconnectStats::default();

        assert_eq!(stats.reconnect_attempts.load(Ordering::Relaxed), 0);
        assert_eq!(stats.consecutive_failures.load(Ordering::Relaxed), 0);

        stats.record_attempt();
        assert_eq!(stats.reconnect_attempts.load(Ordering::Relaxed), 1);

        stats.record_failure();
        assert_eq!(stats.failed_reconnects.load(Ordering::Relaxed), 1);
        assert_eq!(stats.get_consecutive_failures(), 1);

        stats.record_failure();
        assert_eq!(stats.get_consecutive_failures(), 2);

        stats.record_success();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.successful_reconnects, 1);
        assert_eq!(snapshot.consecutive_failures, 0); // Reset on success
    }
}
