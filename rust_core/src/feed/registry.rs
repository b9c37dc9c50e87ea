//! Subscription registry: symbol -> ordered callbacks.
//!
//! Entries exist only while at least one callback is registered. Callbacks
//! are addressed by `SubscriptionHandle` tokens rather than by identity.

use crate::models::FeedEvent;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Callback invoked with every event delivered to a subscription
pub type FeedCallback = Arc<dyn Fn(&FeedEvent) + Send + Sync>;

/// Token returned by `subscribe`, required to unsubscribe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    symbol: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.symbol, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Handle was not registered (already removed)
    NotFound,
    /// Removed; other callbacks remain for the symbol
    Removed,
    /// Removed the last callback; the symbol entry is gone
    RemovedLast,
}

struct Entry {
    id: u64,
    callback: FeedCallback,
    /// Unprimed entries are skipped by fan-out until their initial status is delivered
    primed: bool,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: u64,
    symbols: FxHashMap<String, Vec<Entry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. Returns the handle and whether this is the
    /// first callback for the symbol.
    pub fn insert(&mut self, symbol: &str, callback: FeedCallback) -> (SubscriptionHandle, bool) {
        self.next_id += 1;
        let id = self.next_id;

        let entries = self.symbols.entry(symbol.to_string()).or_default();
        let first = entries.is_empty();
        entries.push(Entry {
            id,
            callback,
            primed: false,
        });

        (
            SubscriptionHandle {
                symbol: symbol.to_string(),
                id,
            },
            first,
        )
    }

    /// Mark a subscription as ready to receive fan-out events
    pub fn prime(&mut self, handle: &SubscriptionHandle) -> bool {
        match self.entry_mut(handle) {
            Some(entry) => {
                entry.primed = true;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, handle: &SubscriptionHandle) -> RemoveOutcome {
        let entries = match self.symbols.get_mut(&handle.symbol) {
            Some(entries) => entries,
            None => return RemoveOutcome::NotFound,
        };

        let before = entries.len();
        entries.retain(|e| e.id != handle.id);
        if entries.len() == before {
            return RemoveOutcome::NotFound;
        }

        if entries.is_empty() {
            self.symbols.remove(&handle.symbol);
            RemoveOutcome::RemovedLast
        } else {
            RemoveOutcome::Removed
        }
    }

    /// Callback for a handle if it is still registered and primed
    pub fn get(&self, handle: &SubscriptionHandle) -> Option<FeedCallback> {
        self.symbols
            .get(&handle.symbol)?
            .iter()
            .find(|e| e.id == handle.id && e.primed)
            .map(|e| e.callback.clone())
    }

    pub fn contains(&self, handle: &SubscriptionHandle) -> bool {
        self.symbols
            .get(&handle.symbol)
            .map_or(false, |entries| entries.iter().any(|e| e.id == handle.id))
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.symbols.contains_key(symbol)
    }

    /// Handles for one symbol in registration order
    pub fn handles_for(&self, symbol: &str) -> Vec<SubscriptionHandle> {
        self.symbols
            .get(symbol)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| SubscriptionHandle {
                        symbol: symbol.to_string(),
                        id: e.id,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Handles across every symbol; registration order within a symbol
    pub fn all_handles(&self) -> Vec<SubscriptionHandle> {
        self.symbols
            .keys()
            .flat_map(|symbol| self.handles_for(symbol))
            .collect()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.keys().cloned().collect()
    }

    pub fn subscriber_count(&self, symbol: &str) -> usize {
        self.symbols.get(symbol).map_or(0, |entries| entries.len())
    }

    /// Number of symbols with at least one subscriber
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn clear(&mut self) {
        self.symbols.clear();
    }

    fn entry_mut(&mut self, handle: &SubscriptionHandle) -> Option<&mut Entry> {
        self.symbols
            .get_mut(&handle.symbol)?
            .iter_mut()
            .find(|e| e.id == handle.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> FeedCallback {
        Arc::new(|_event: &FeedEvent| {})
    }

    #[test]
    fn test_first_insert_creates_symbol() {
        let mut registry = SubscriptionRegistry::new();
        let (a, first_a) = registry.insert("AAPL", noop());
        let (b, first_b) = registry.insert("AAPL", noop());

        assert!(first_a);
        assert!(!first_b);
        assert_ne!(a, b);
        assert_eq!(registry.subscriber_count("AAPL"), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_symbols_are_case_sensitive() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert("brk.a", noop());
        let (_, first) = registry.insert("BRK.A", noop());
        assert!(first);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_last_deletes_symbol() {
        let mut registry = SubscriptionRegistry::new();
        let (a, _) = registry.insert("MSFT", noop());
        let (b, _) = registry.insert("MSFT", noop());

        assert_eq!(registry.remove(&a), RemoveOutcome::Removed);
        assert!(registry.has_symbol("MSFT"));
        assert_eq!(registry.remove(&b), RemoveOutcome::RemovedLast);
        assert!(!registry.has_symbol("MSFT"));

        // Idempotent
        assert_eq!(registry.remove(&b), RemoveOutcome::NotFound);
    }

    #[test]
    fn test_unprimed_entries_are_hidden_from_get() {
        let mut registry = SubscriptionRegistry::new();
        let (handle, _) = registry.insert("TSLA", noop());

        assert!(registry.contains(&handle));
        assert!(registry.get(&handle).is_none());

        assert!(registry.prime(&handle));
        assert!(registry.get(&handle).is_some());
    }

    #[test]
    fn test_handles_preserve_registration_order() {
        let mut registry = SubscriptionRegistry::new();
        let (a, _) = registry.insert("NVDA", noop());
        let (b, _) = registry.insert("NVDA", noop());
        let (c, _) = registry.insert("NVDA", noop());
        registry.insert("AMD", noop());

        assert_eq!(registry.handles_for("NVDA"), vec![a, b, c]);
        assert_eq!(registry.all_handles().len(), 4);
    }
}
