use std::sync::Arc;

use serde::Serialize;

use super::config::CacheConfig;
use super::store::{CompressedStore, DecodedStore};
use super::telemetry::{EvictionObserver, MetricsEvictionObserver, Tier};

/// The two cache tiers and the configuration they were built from.
///
/// Constructed once by the server and shared through request state; tests
/// build as many independent instances as they need.
pub struct PageCache {
    config: CacheConfig,
    decoded: DecodedStore,
    compressed: CompressedStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub population_enabled: bool,
    pub decoded_len: usize,
    pub decoded_capacity: usize,
    pub compressed_len: usize,
    pub compressed_capacity: usize,
}

impl PageCache {
    /// Build a cache that reports evictions through the `metrics` facade.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_observer(config, Arc::new(MetricsEvictionObserver))
    }

    pub fn with_observer(config: CacheConfig, observer: Arc<dyn EvictionObserver>) -> Self {
        let decoded = DecodedStore::new(
            Tier::Decoded,
            config.decoded_capacity,
            Arc::clone(&observer),
        );
        let compressed =
            CompressedStore::new(Tier::Compressed, config.compressed_capacity, observer);
        Self {
            config,
            decoded,
            compressed,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn population_enabled(&self) -> bool {
        self.config.population_enabled()
    }

    pub fn decoded(&self) -> &DecodedStore {
        &self.decoded
    }

    pub fn compressed(&self) -> &CompressedStore {
        &self.compressed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            population_enabled: self.population_enabled(),
            decoded_len: self.decoded.len(),
            decoded_capacity: self.decoded.capacity(),
            compressed_len: self.compressed.len(),
            compressed_capacity: self.compressed.capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cache_is_empty_with_configured_capacities() {
        let cache = PageCache::new(CacheConfig::from_limits(3, 30).unwrap());
        assert_eq!(
            cache.stats(),
            CacheStats {
                population_enabled: true,
                decoded_len: 0,
                decoded_capacity: 3,
                compressed_len: 0,
                compressed_capacity: 30,
            }
        );
    }
}
