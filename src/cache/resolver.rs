//! Promotion resolver.
//!
//! Decides whether a request is served from the decoded tier, rehydrated
//! from the compressed tier, or rendered by the origin.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, error};

use super::codec::{self, CodecError};
use super::document::{DocumentError, PageDocument};
use super::keys::CacheKey;
use super::store::{CompressedEntry, DecodedEntry};
use super::tiers::PageCache;

#[derive(Debug, Clone)]
pub enum Resolution {
    /// Found in the decoded tier.
    Hit(Arc<DecodedEntry>),
    /// Rebuilt from the compressed tier and stored in the decoded tier.
    Promoted(Arc<DecodedEntry>),
    /// Neither tier can serve the key.
    Miss,
}

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("failed to decompress stored page: {0}")]
    Decompress(#[from] CodecError),
    #[error("failed to parse stored page: {0}")]
    Parse(#[from] DocumentError),
}

impl PageCache {
    /// Resolve `key` against both tiers.
    ///
    /// Promotion is tried first, and only when the decoded tier lacks the key.
    /// A compressed entry that fails to promote is dropped and the request is
    /// reported as a miss.
    pub fn resolve(&self, key: &CacheKey) -> Resolution {
        if !self.decoded().has(key)
            && let Some(cold) = self.compressed().get(key)
        {
            return match self.promote(key, &cold) {
                Ok(entry) => {
                    debug!(cache = "compressed", outcome = "promote", key = %key, "promoted page");
                    Resolution::Promoted(entry)
                }
                Err(err) => {
                    counter!("pagecache_decompress_failure_total").increment(1);
                    error!(
                        cache = "compressed",
                        outcome = "promote_failed",
                        key = %key,
                        error = %err,
                        "dropping unreadable compressed page"
                    );
                    self.compressed().remove(key);
                    Resolution::Miss
                }
            };
        }

        match self.decoded().get(key) {
            Some(entry) => Resolution::Hit(entry),
            None => Resolution::Miss,
        }
    }

    fn promote(
        &self,
        key: &CacheKey,
        cold: &CompressedEntry,
    ) -> Result<Arc<DecodedEntry>, PromotionError> {
        let html = codec::decompress(&cold.bytes)?;
        let document = PageDocument::parse(&html)?;
        let entry = DecodedEntry {
            document: Arc::new(document),
            headers: cold.headers.clone(),
        };
        Ok(self.decoded().set(key.clone(), entry))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, header};
    use bytes::Bytes;

    use super::*;
    use crate::cache::CacheConfig;

    const PAGE: &str = concat!(
        "<html><body>cached",
        r#"<script id="__PAGE_DATA__">{}</script>"#,
        r#"<script id="__REQUEST_CONTEXT__">{}</script>"#,
        "</body></html>"
    );

    fn cache() -> PageCache {
        PageCache::new(CacheConfig::from_limits(2, 8).unwrap())
    }

    fn html_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        headers
    }

    fn store_compressed(cache: &PageCache, key: &CacheKey, bytes: Bytes) {
        cache.compressed().set(
            key.clone(),
            CompressedEntry {
                bytes,
                headers: html_headers(),
            },
        );
    }

    #[test]
    fn unknown_key_is_a_miss_without_mutation() {
        let cache = cache();
        assert!(matches!(cache.resolve(&CacheKey::from("/nope")), Resolution::Miss));
        assert!(cache.decoded().is_empty());
        assert!(cache.compressed().is_empty());
    }

    #[test]
    fn decoded_entry_is_a_hit() {
        let cache = cache();
        let key = CacheKey::from("/hot");
        cache.decoded().set(
            key.clone(),
            DecodedEntry {
                document: Arc::new(PageDocument::parse(PAGE).unwrap()),
                headers: html_headers(),
            },
        );

        assert!(matches!(cache.resolve(&key), Resolution::Hit(_)));
    }

    #[test]
    fn compressed_only_entry_is_promoted_into_decoded_tier() {
        let cache = cache();
        let key = CacheKey::from("/cold");
        store_compressed(&cache, &key, codec::compress(PAGE.as_bytes()).unwrap());

        let Resolution::Promoted(entry) = cache.resolve(&key) else {
            panic!("expected promotion");
        };
        assert_eq!(entry.document.to_html(), PAGE);
        assert_eq!(entry.headers, html_headers());
        assert!(cache.decoded().has(&key));

        // The second lookup is served from the decoded tier.
        assert!(matches!(cache.resolve(&key), Resolution::Hit(_)));
    }

    #[test]
    fn corrupted_compressed_entry_is_dropped_and_missed() {
        let cache = cache();
        let key = CacheKey::from("/broken");
        let packed = codec::compress(PAGE.as_bytes()).unwrap();
        store_compressed(&cache, &key, packed.slice(..packed.len() / 2));

        assert!(matches!(cache.resolve(&key), Resolution::Miss));
        assert!(!cache.compressed().has(&key));
        assert!(!cache.decoded().has(&key));
    }
}
