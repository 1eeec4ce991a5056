//! Two-tier in-process cache for server-rendered HTML pages.
//!
//! See [`cache`] for the cache itself and [`infra::http`] for the proxy
//! router used by the `pagecache` binary.

pub mod cache;
pub mod config;
pub mod error;
pub mod infra;
