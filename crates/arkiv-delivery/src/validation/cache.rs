//! Bounded per-address key-value cache
//!
//! Each address (see [`super::canonical::dictionary_name`]) owns one
//! [`CacheEntry`] holding
//!
//! - values confirmed by a live query to exist exactly once, and
//! - optionally, the full value multiset of the referenced key, loaded once.
//!
//! Two bounds apply. The address budget keeps at most `max_addresses`
//! entries, evicting the least recently used address. The value ceiling keeps
//! the number of values across all entries, confirmed and preloaded, at or
//! below [`MAX_CACHED_VALUES`]. Confirmed values are evicted one at a time
//! from the largest entry; a preloaded multiset is dropped with its address.
//! A multiset with more distinct values than the ceiling is never kept, the
//! entry records [`Preload::TooLarge`] instead.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::debug;

use super::canonical::KeyValue;
use crate::error::{DeliveryError, Result};

/// Ceiling on values held across all addresses
pub const MAX_CACHED_VALUES: usize = 8192;

/// Outcome of loading the value multiset of one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preload {
    /// Occurrences per value
    Loaded(HashMap<KeyValue, u64>),
    /// The address has more distinct values than the cache may hold
    TooLarge,
}

impl Preload {
    fn len(&self) -> usize {
        match self {
            Preload::Loaded(values) => values.len(),
            Preload::TooLarge => 0,
        }
    }
}

/// Values known for one address
#[derive(Debug)]
pub struct CacheEntry {
    address: String,
    confirmed: Mutex<HashSet<KeyValue>>,
    preloaded: OnceCell<Preload>,
}

impl CacheEntry {
    fn new(address: String) -> Self {
        Self {
            address,
            confirmed: Mutex::new(HashSet::new()),
            preloaded: OnceCell::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn contains(&self, value: &KeyValue) -> bool {
        self.confirmed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(value)
    }

    /// Confirmed plus preloaded values
    pub fn len(&self) -> usize {
        self.confirmed_len() + self.preloaded.get().map_or(0, Preload::len)
    }

    fn confirmed_len(&self) -> usize {
        self.confirmed.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, value: KeyValue) -> bool {
        self.confirmed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(value)
    }

    fn evict_one(&self) -> bool {
        let mut confirmed = self.confirmed.lock().unwrap_or_else(PoisonError::into_inner);
        let victim = confirmed.iter().next().cloned();
        match victim {
            Some(value) => confirmed.remove(&value),
            None => false,
        }
    }

    pub fn is_preloaded(&self) -> bool {
        self.preloaded.initialized()
    }

    pub fn preloaded(&self) -> Option<&Preload> {
        self.preloaded.get()
    }
}

/// Address-keyed cache shared by the workers of one validator
#[derive(Debug)]
pub struct KeyValueCache {
    max_values: usize,
    entries: DashMap<String, Arc<CacheEntry>>,
    /// Addresses from least to most recently used
    recency: Mutex<VecDeque<String>>,
}

impl Default for KeyValueCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueCache {
    pub fn new() -> Self {
        Self::with_max_values(MAX_CACHED_VALUES)
    }

    pub fn with_max_values(max_values: usize) -> Self {
        Self {
            max_values: max_values.max(1),
            entries: DashMap::new(),
            recency: Mutex::new(VecDeque::new()),
        }
    }

    /// Fetch or create the entry for `address` and mark it most recent
    ///
    /// Least recently used addresses beyond `max_addresses` (at least one) are
    /// evicted. Callers keep evicted entries alive through their `Arc` until
    /// they drop it.
    pub fn entry(&self, address: &str, max_addresses: usize) -> Arc<CacheEntry> {
        let max_addresses = max_addresses.max(1);
        let mut recency = self.recency.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(position) = recency.iter().position(|a| a == address) {
            recency.remove(position);
        }
        recency.push_back(address.to_string());

        let entry = self
            .entries
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(CacheEntry::new(address.to_string())))
            .clone();

        while recency.len() > max_addresses {
            if let Some(evicted) = recency.pop_front() {
                self.entries.remove(&evicted);
                debug!(address = %evicted, "Evicted key value cache entry");
            }
        }

        entry
    }

    /// Record a value confirmed to exist exactly once
    pub fn confirm(&self, entry: &CacheEntry, value: KeyValue) {
        if entry.insert(value) {
            self.enforce_value_ceiling(None);
        }
    }

    /// Load the full value multiset of `entry`, at most once
    ///
    /// `load` receives the number of distinct values the cache may hold and
    /// answers [`Preload::TooLarge`] once the referenced key exceeds it.
    /// Concurrent callers wait for the first loader. A failed load leaves the
    /// entry empty so a later call can try again.
    pub async fn preload<'e, F, Fut>(&self, entry: &'e CacheEntry, load: F) -> Result<&'e Preload>
    where
        F: FnOnce(usize) -> Fut,
        Fut: Future<Output = Result<Preload>>,
    {
        let limit = self.max_values;
        let preload = entry
            .preloaded
            .get_or_try_init(move || async move {
                let preload = load(limit).await?;
                match &preload {
                    Preload::Loaded(values) => {
                        debug!(address = %entry.address, values = values.len(), "Preloaded key values")
                    }
                    Preload::TooLarge => {
                        debug!(address = %entry.address, limit, "Key values exceed the cache ceiling")
                    }
                }
                Ok::<_, DeliveryError>(preload)
            })
            .await?;

        if preload.len() > 0 {
            self.enforce_value_ceiling(Some(entry.address()));
        }
        Ok(preload)
    }

    /// Whether `address` is currently cached
    pub fn contains_address(&self, address: &str) -> bool {
        self.entries.contains_key(address)
    }

    pub fn address_count(&self) -> usize {
        self.entries.len()
    }

    /// Confirmed and preloaded values held across all addresses
    pub fn value_count(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    pub fn clear(&self) {
        let mut recency = self.recency.lock().unwrap_or_else(PoisonError::into_inner);
        recency.clear();
        self.entries.clear();
    }

    fn remove_address(&self, address: &str) {
        let mut recency = self.recency.lock().unwrap_or_else(PoisonError::into_inner);
        recency.retain(|a| a != address);
        self.entries.remove(address);
        debug!(address, "Dropped preloaded key values over the cache ceiling");
    }

    /// Shed values, largest entry first, until the ceiling holds
    ///
    /// The preloaded multiset of `keep` is never dropped.
    fn enforce_value_ceiling(&self, keep: Option<&str>) {
        loop {
            let mut sizes: Vec<(usize, Arc<CacheEntry>)> = self
                .entries
                .iter()
                .map(|e| (e.value().len(), Arc::clone(e.value())))
                .collect();

            let total: usize = sizes.iter().map(|(len, _)| len).sum();
            if total <= self.max_values {
                return;
            }

            sizes.sort_by(|a, b| b.0.cmp(&a.0));
            let shed = sizes.iter().find_map(|(len, entry)| {
                if entry.confirmed_len() > 0 {
                    entry.evict_one().then_some(())
                } else if *len > 0 && keep != Some(entry.address()) {
                    self.remove_address(entry.address());
                    Some(())
                } else {
                    None
                }
            });
            if shed.is_none() {
                return;
            }
        }
    }
}
