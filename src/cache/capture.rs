//! Capture hook.
//!
//! Decides whether a rendered response may populate the cache and, once the
//! body has been delivered, fills both tiers from it.

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use bytes::Bytes;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, warn};

use super::codec::{self, CodecError};
use super::document::{DocumentError, PAGE_DATA_MARKER, PageDocument};
use super::keys::CacheKey;
use super::status::CACHE_STATUS_HEADER;
use super::store::{CompressedEntry, DecodedEntry};
use super::tiers::PageCache;

/// Largest body buffered for capture. Larger pages are still streamed to the
/// client but never enter the cache.
pub const MAX_CAPTURE_BYTES: usize = 4 * 1024 * 1024;

/// Headers never replayed from a cached page. Every patch produces a new body,
/// so framing and validators describing the captured bytes are dropped.
const EXCLUDED_HEADERS: [HeaderName; 6] = [
    header::SET_COOKIE,
    CACHE_STATUS_HEADER,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::ETAG,
    header::LAST_MODIFIED,
];

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("response body is not valid UTF-8")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("failed to parse response body: {0}")]
    Parse(#[from] DocumentError),
    #[error("failed to compress response body: {0}")]
    Compress(#[from] CodecError),
}

/// Status and content-type half of the eligibility check, decidable before
/// the body is read.
pub fn is_candidate(status: StatusCode, headers: &HeaderMap) -> bool {
    status == StatusCode::OK
        && headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/html"))
}

/// Whether the body carries the page-data script tag.
pub fn has_page_marker(body: &[u8]) -> bool {
    let marker = PAGE_DATA_MARKER.as_bytes();
    body.windows(marker.len()).any(|window| window == marker)
}

pub fn is_eligible(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> bool {
    is_candidate(status, headers) && has_page_marker(body)
}

/// Copy of `headers` without the entries that must not be replayed.
pub fn replay_headers(headers: &HeaderMap) -> HeaderMap {
    let mut kept = headers.clone();
    for name in EXCLUDED_HEADERS {
        kept.remove(name);
    }
    kept
}

impl PageCache {
    /// Populate both tiers from a delivered page body.
    ///
    /// `headers` should already be filtered with [`replay_headers`]. The tiers
    /// are filled independently and may diverge later through eviction.
    pub fn capture(
        &self,
        key: CacheKey,
        headers: HeaderMap,
        body: &[u8],
    ) -> Result<(), CaptureError> {
        let html = std::str::from_utf8(body)?;
        let document = PageDocument::parse(html)?;
        let compressed = codec::compress(body)?;

        self.decoded().set(
            key.clone(),
            DecodedEntry {
                document: Arc::new(document),
                headers: headers.clone(),
            },
        );
        self.compressed().set(
            key,
            CompressedEntry {
                bytes: compressed,
                headers,
            },
        );
        Ok(())
    }
}

/// Queue a capture of a delivered body on the blocking pool.
///
/// Failures are logged and counted; the response has already been sent.
pub(crate) fn spawn_capture(
    cache: Arc<PageCache>,
    key: CacheKey,
    headers: HeaderMap,
    body: Bytes,
) {
    if !has_page_marker(&body) {
        counter!("pagecache_capture_total", "outcome" => "skipped").increment(1);
        debug!(key = %key, outcome = "skipped", "response lacks page data marker");
        return;
    }

    tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        match cache.capture(key.clone(), headers, &body) {
            Ok(()) => {
                histogram!("pagecache_capture_ms").record(started.elapsed().as_secs_f64() * 1000.0);
                counter!("pagecache_capture_total", "outcome" => "stored").increment(1);
                debug!(key = %key, outcome = "stored", bytes = body.len(), "captured page");
            }
            Err(err) => {
                counter!("pagecache_capture_total", "outcome" => "failed").increment(1);
                warn!(key = %key, outcome = "failed", error = %err, "page capture failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::cache::{CacheConfig, PagePatch, apply_patch};

    const PAGE: &str = concat!(
        "<html><body>",
        r#"<script id="__PAGE_DATA__">{}</script>"#,
        r#"<script id="__REQUEST_CONTEXT__">{}</script>"#,
        "</body></html>"
    );

    fn headers(content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers
    }

    #[test]
    fn html_200_with_marker_is_eligible() {
        assert!(is_eligible(
            StatusCode::OK,
            &headers("text/html; charset=utf-8"),
            PAGE.as_bytes()
        ));
    }

    #[test]
    fn non_200_is_not_eligible() {
        assert!(!is_eligible(StatusCode::NOT_FOUND, &headers("text/html"), PAGE.as_bytes()));
        assert!(!is_eligible(StatusCode::CREATED, &headers("text/html"), PAGE.as_bytes()));
    }

    #[test]
    fn non_html_is_not_eligible() {
        assert!(!is_eligible(StatusCode::OK, &headers("application/json"), PAGE.as_bytes()));
        assert!(!is_eligible(StatusCode::OK, &headers("text/plain"), PAGE.as_bytes()));
        assert!(!is_eligible(StatusCode::OK, &HeaderMap::new(), PAGE.as_bytes()));
    }

    #[test]
    fn html_without_marker_is_not_eligible() {
        assert!(!is_eligible(
            StatusCode::OK,
            &headers("text/html"),
            b"<html><body>plain</body></html>"
        ));
    }

    #[test]
    fn replay_headers_strip_cookies_status_framing_and_validators() {
        let mut source = headers("text/html");
        source.insert(header::SET_COOKIE, HeaderValue::from_static("sid=1"));
        source.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("miss"));
        source.insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        source.insert(header::ETAG, HeaderValue::from_static("\"v1\""));
        source.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"),
        );
        source.insert("x-renderer", HeaderValue::from_static("ssr"));

        let kept = replay_headers(&source);
        assert!(kept.get(header::ETAG).is_none());
        assert!(kept.get(header::LAST_MODIFIED).is_none());
        assert!(kept.get(header::SET_COOKIE).is_none());
        assert!(kept.get(CACHE_STATUS_HEADER).is_none());
        assert!(kept.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(kept.get("x-renderer").unwrap(), "ssr");
        assert_eq!(kept.get(header::CONTENT_TYPE).unwrap(), "text/html");
    }

    #[test]
    fn capture_populates_both_tiers() {
        let cache = PageCache::new(CacheConfig::from_limits(2, 4).unwrap());
        let key = CacheKey::from("/post?x=1");

        cache
            .capture(key.clone(), headers("text/html"), PAGE.as_bytes())
            .expect("capture");

        let hot = cache.decoded().get(&key).expect("decoded entry");
        assert_eq!(apply_patch(&hot.document, &PagePatch::default()).html, PAGE);
        let cold = cache.compressed().get(&key).expect("compressed entry");
        assert_eq!(codec::decompress(&cold.bytes).unwrap(), PAGE);
        assert_eq!(cold.headers, hot.headers);
    }

    #[test]
    fn invalid_utf8_is_not_captured() {
        let cache = PageCache::new(CacheConfig::from_limits(2, 4).unwrap());
        let result = cache.capture(CacheKey::from("/bin"), headers("text/html"), &[0xff, 0xfe]);
        assert!(matches!(result, Err(CaptureError::NotUtf8(_))));
        assert!(cache.decoded().is_empty());
        assert!(cache.compressed().is_empty());
    }
}
