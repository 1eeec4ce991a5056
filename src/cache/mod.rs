//! Two-tier page cache.
//!
//! Sits between the HTTP router and the page renderer:
//!
//! - **Decoded tier**: a small LRU of parsed documents, served after patching
//!   the per-request payloads.
//! - **Compressed tier**: a larger LRU of gzip-compressed bodies, promoted into
//!   the decoded tier when the same page is requested again.
//!
//! Pages enter both tiers through the capture hook after a successful render
//! and leave only through capacity eviction.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! disable_population = false
//! decoded_capacity = 64
//! compressed_capacity = 1024
//! ```

mod capture;
mod codec;
mod config;
mod document;
mod keys;
mod lock;
mod middleware;
mod patch;
mod resolver;
mod status;
mod store;
mod telemetry;
mod tiers;

pub use capture::{
    CaptureError, MAX_CAPTURE_BYTES, has_page_marker, is_candidate, is_eligible, replay_headers,
};
pub use codec::{CodecError, compress, decompress};
pub use config::{CacheConfig, CapacityError};
pub use document::{
    DocumentError, Marker, PAGE_DATA_MARKER, PageDocument, REQUEST_CONTEXT_MARKER,
};
pub use keys::CacheKey;
pub use middleware::{CacheState, page_cache_layer};
pub use patch::{
    KeepCaptured, PagePatch, PatchSource, PatchedPage, StructuralViolation, apply_patch,
    report_violations,
};
pub use resolver::{PromotionError, Resolution};
pub use status::{CACHE_STATUS_HEADER, CacheStatus};
pub use store::{CompressedEntry, CompressedStore, DecodedEntry, DecodedStore, TierStore};
pub use telemetry::{
    EvictionObserver, EvictionSample, MetricsEvictionObserver, Tier, process_memory_bytes,
};
pub use tiers::{CacheStats, PageCache};
