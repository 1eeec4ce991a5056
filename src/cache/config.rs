//! Page cache configuration.
//!
//! Exactly three knobs: a kill switch for population and the capacity of each
//! tier. Capacities are validated when settings load, so a `CacheConfig` always
//! describes a usable cache.

use std::num::NonZeroUsize;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Stop populating either tier; lookups report `disabled`.
    pub disable_population: bool,
    /// Maximum parsed documents held in the decoded tier.
    pub decoded_capacity: NonZeroUsize,
    /// Maximum compressed bodies held in the compressed tier.
    pub compressed_capacity: NonZeroUsize,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("`{tier}` capacity must be greater than zero")]
pub struct CapacityError {
    pub tier: &'static str,
}

impl CacheConfig {
    pub fn new(decoded_capacity: NonZeroUsize, compressed_capacity: NonZeroUsize) -> Self {
        Self {
            disable_population: false,
            decoded_capacity,
            compressed_capacity,
        }
    }

    /// Build a config from raw limits, rejecting zero.
    pub fn from_limits(decoded: usize, compressed: usize) -> Result<Self, CapacityError> {
        let decoded =
            NonZeroUsize::new(decoded).ok_or(CapacityError { tier: "decoded" })?;
        let compressed =
            NonZeroUsize::new(compressed).ok_or(CapacityError { tier: "compressed" })?;
        Ok(Self::new(decoded, compressed))
    }

    pub fn with_population_disabled(mut self) -> Self {
        self.disable_population = true;
        self
    }

    pub fn population_enabled(&self) -> bool {
        !self.disable_population
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            disable_population: settings.disable_population,
            decoded_capacity: settings.decoded_capacity,
            compressed_capacity: settings.compressed_capacity,
        }
    }
}
