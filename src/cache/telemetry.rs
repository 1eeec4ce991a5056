//! Eviction telemetry.
//!
//! Every capacity-driven eviction produces one [`EvictionSample`]. The sample is
//! advisory: observers run inline with the insert that evicted, so they must be
//! cheap and must not panic.

use metrics::{counter, gauge};
use tracing::debug;

use super::keys::CacheKey;

/// Which level of the page cache an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Parsed documents ready to patch and serve.
    Decoded,
    /// Gzip-compressed response bodies.
    Compressed,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Decoded => "decoded",
            Tier::Compressed => "compressed",
        }
    }
}

/// Snapshot taken right after an entry was evicted.
#[derive(Debug, Clone)]
pub struct EvictionSample {
    pub tier: Tier,
    pub evicted: CacheKey,
    /// Tier occupancy after the eviction.
    pub cache_size: usize,
    /// Resident memory of the process, when the platform reports it.
    pub process_memory_bytes: Option<u64>,
}

/// Receives eviction samples from a tier.
pub trait EvictionObserver: Send + Sync {
    fn record_eviction(&self, sample: &EvictionSample);
}

/// Forwards samples to the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsEvictionObserver;

impl EvictionObserver for MetricsEvictionObserver {
    fn record_eviction(&self, sample: &EvictionSample) {
        let tier = sample.tier.as_str();
        counter!("pagecache_evict_total", "tier" => tier).increment(1);

        if let Some(bytes) = sample.process_memory_bytes {
            gauge!(
                "pagecache_process_memory_bytes",
                "tier" => tier,
                "cache_size" => sample.cache_size.to_string()
            )
            .set(bytes as f64);
        }

        debug!(
            cache = tier,
            outcome = "evict",
            key = %sample.evicted,
            cache_size = sample.cache_size,
            process_memory_bytes = sample.process_memory_bytes,
            "evicted least recently used page"
        );
    }
}

/// Current physical memory footprint of this process.
pub fn process_memory_bytes() -> Option<u64> {
    memory_stats::memory_stats().map(|stats| stats.physical_mem as u64)
}
