use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use moka::policy::EvictionPolicy;
use tokio::time::Instant;

use crate::types::{OptionPayload, RequestDescriptor};
use crate::utils::futures::CallOnDrop;

/// A snapshot of one cached option.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    /// The payload of the last successful fetch.
    pub data: OptionPayload,
    /// When `data` was fetched.
    pub timestamp: Instant,
    /// Whether a background refresh for this key is currently running.
    pub refreshing: bool,
}

/// An item saved in the in-memory moka cache.
#[derive(Clone, Debug)]
struct StoredItem {
    data: OptionPayload,
    timestamp: Instant,
}

type Refreshes = Arc<Mutex<HashSet<RequestDescriptor>>>;

/// Option payloads keyed by their [`RequestDescriptor`].
///
/// Writes always overwrite the previous entry of a key. Without a configured capacity entries are
/// kept for the lifetime of the store, otherwise the least recently used entries are evicted once
/// the capacity is exceeded.
///
/// Cloning a `CacheStore` gives another handle to the same entries.
#[derive(Clone)]
pub struct CacheStore {
    entries: moka::sync::Cache<RequestDescriptor, StoredItem>,

    /// Keys that currently have a refresh running.
    refreshes: Refreshes,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let refreshes = self
            .refreshes
            .try_lock()
            .map(|r| r.len())
            .unwrap_or_default();
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.entry_count())
            .field("running refreshes", &refreshes)
            .finish()
    }
}

impl CacheStore {
    pub fn new(max_entries: Option<u64>) -> Self {
        let builder = moka::sync::Cache::<RequestDescriptor, StoredItem>::builder().name("options");
        let entries = match max_entries {
            Some(capacity) => builder
                .max_capacity(capacity)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
            None => builder.build(),
        };

        Self {
            entries,
            refreshes: Default::default(),
        }
    }

    /// Returns the entry for `key`, if any.
    pub fn get(&self, key: &RequestDescriptor) -> Option<CacheEntry> {
        let item = self.entries.get(key)?;
        Some(CacheEntry {
            data: item.data,
            timestamp: item.timestamp,
            refreshing: self.is_refreshing(key),
        })
    }

    /// Stores `data` for `key`, fetched just now.
    pub fn insert(&self, key: RequestDescriptor, data: OptionPayload) {
        self.insert_at(key, data, Instant::now());
    }

    /// Stores `data` for `key`, fetched at `timestamp`.
    ///
    /// This does not touch a refresh that may be running for the key. The refresh keeps its
    /// [`RefreshToken`] until it completes.
    pub fn insert_at(&self, key: RequestDescriptor, data: OptionPayload, timestamp: Instant) {
        self.entries.insert(key, StoredItem { data, timestamp });
    }

    /// Whether a refresh is running for `key`.
    pub fn is_refreshing(&self, key: &RequestDescriptor) -> bool {
        self.refreshes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Marks `key` as refreshing, unless it already is.
    ///
    /// Returns `None` if another refresh for `key` is running. Otherwise the key stays marked
    /// until the returned token is dropped.
    pub fn try_begin_refresh(&self, key: &RequestDescriptor) -> Option<RefreshToken> {
        let mut refreshes = self
            .refreshes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !refreshes.insert(key.clone()) {
            return None;
        }
        drop(refreshes);

        let guard = {
            let key = key.clone();
            let refreshes = Arc::clone(&self.refreshes);
            CallOnDrop::new(move || {
                refreshes
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&key);
            })
        };
        Some(RefreshToken { _guard: guard })
    }

    /// The number of cached entries.
    ///
    /// This runs pending maintenance first, so evictions are accounted for.
    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}

/// Marks a key as refreshing while alive.
///
/// Move this into the refresh task so that the mark is removed however the task ends.
#[derive(Debug)]
pub struct RefreshToken {
    _guard: CallOnDrop,
}
