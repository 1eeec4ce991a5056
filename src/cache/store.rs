//! Cache tier storage.
//!
//! Both tiers are bounded LRU maps keyed by [`CacheKey`]. Inserting past
//! capacity evicts the least recently used entry and reports it to the
//! tier's [`EvictionObserver`]; capacity eviction is how entries leave a tier.

use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};

use axum::http::HeaderMap;
use bytes::Bytes;
use lru::LruCache;

use super::document::PageDocument;
use super::keys::CacheKey;
use super::lock::{read_tier, write_tier};
use super::telemetry::{EvictionObserver, EvictionSample, Tier, process_memory_bytes};

/// Decoded tier entry: a parsed page plus the headers to replay with it.
#[derive(Debug, Clone)]
pub struct DecodedEntry {
    pub document: Arc<PageDocument>,
    pub headers: HeaderMap,
}

/// Compressed tier entry: the gzip-compressed body plus replay headers.
#[derive(Debug, Clone)]
pub struct CompressedEntry {
    pub bytes: Bytes,
    pub headers: HeaderMap,
}

pub type DecodedStore = TierStore<DecodedEntry>;
pub type CompressedStore = TierStore<CompressedEntry>;

pub struct TierStore<V> {
    tier: Tier,
    entries: RwLock<LruCache<CacheKey, Arc<V>>>,
    observer: Arc<dyn EvictionObserver>,
}

impl<V> TierStore<V> {
    pub fn new(tier: Tier, capacity: NonZeroUsize, observer: Arc<dyn EvictionObserver>) -> Self {
        Self {
            tier,
            entries: RwLock::new(LruCache::new(capacity)),
            observer,
        }
    }

    /// Fetch an entry and mark it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<V>> {
        write_tier(&self.entries, self.tier, "get").get(key).cloned()
    }

    /// Presence check that leaves recency untouched.
    pub fn has(&self, key: &CacheKey) -> bool {
        read_tier(&self.entries, self.tier, "has").contains(key)
    }

    /// Insert or overwrite `key`, returning the stored entry.
    ///
    /// Overwriting an existing key refreshes its recency and is not an eviction.
    pub fn set(&self, key: CacheKey, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let (evicted, cache_size) = {
            let mut entries = write_tier(&self.entries, self.tier, "set");
            let evicted = entries
                .push(key.clone(), Arc::clone(&value))
                .map(|(old_key, _)| old_key)
                .filter(|old_key| *old_key != key);
            (evicted, entries.len())
        };

        if let Some(evicted) = evicted {
            self.observer.record_eviction(&EvictionSample {
                tier: self.tier,
                evicted,
                cache_size,
                process_memory_bytes: process_memory_bytes(),
            });
        }
        value
    }

    /// Drop an entry that can no longer be served.
    pub(crate) fn remove(&self, key: &CacheKey) -> bool {
        write_tier(&self.entries, self.tier, "remove")
            .pop(key)
            .is_some()
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn len(&self) -> usize {
        read_tier(&self.entries, self.tier, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        read_tier(&self.entries, self.tier, "capacity").cap().get()
    }
}
