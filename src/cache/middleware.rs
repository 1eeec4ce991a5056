//! Page cache middleware.
//!
//! Serves GET requests from the cache when possible and otherwise lets the
//! origin render, teeing an eligible response body so it can be captured once
//! it has been streamed to the client.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request},
    middleware::Next,
    response::Response,
};
use bytes::BytesMut;
use futures::StreamExt;
use metrics::counter;
use tracing::{debug, instrument};

use super::{
    PageCache,
    capture::{self, MAX_CAPTURE_BYTES, spawn_capture},
    keys::CacheKey,
    patch::{self, PatchSource, apply_patch},
    resolver::Resolution,
    status::{CACHE_STATUS_HEADER, CacheStatus},
    store::DecodedEntry,
};

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub cache: Arc<PageCache>,
    pub patches: Arc<dyn PatchSource>,
}

impl CacheState {
    pub fn new(cache: Arc<PageCache>, patches: Arc<dyn PatchSource>) -> Self {
        Self { cache, patches }
    }
}

/// Middleware for the two-tier page cache.
///
/// Non-GET requests pass straight through without a status header.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn page_cache_layer(
    State(state): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    if !state.cache.population_enabled() {
        counter!("pagecache_disabled_total").increment(1);
        let mut response = next.run(request).await;
        stamp(&mut response, CacheStatus::Disabled);
        return response;
    }

    let key = CacheKey::from_uri(request.uri());

    match state.cache.resolve(&key) {
        Resolution::Hit(entry) => {
            counter!("pagecache_hit_total").increment(1);
            debug!(cache = "decoded", outcome = "hit", key = %key, "serving cached page");
            return serve_cached(&state, &key, &request, &entry, CacheStatus::Hit);
        }
        Resolution::Promoted(entry) => {
            counter!("pagecache_transfer_total").increment(1);
            debug!(cache = "compressed", outcome = "transferring", key = %key, "serving promoted page");
            return serve_cached(&state, &key, &request, &entry, CacheStatus::Transferring);
        }
        Resolution::Miss => {}
    }

    counter!("pagecache_miss_total").increment(1);
    debug!(cache = "page", outcome = "miss", key = %key, "cache miss, rendering from origin");

    let mut response = next.run(request).await;
    stamp(&mut response, CacheStatus::Miss);
    capture_after_delivery(Arc::clone(&state.cache), key, response)
}

fn serve_cached(
    state: &CacheState,
    key: &CacheKey,
    request: &Request<Body>,
    entry: &DecodedEntry,
    status: CacheStatus,
) -> Response {
    let payloads = state.patches.patch_for(key, request.headers());
    let patched = apply_patch(&entry.document, &payloads);
    patch::report_violations(key, &patched.violations);

    let mut response = Response::new(Body::from(patched.html));
    *response.headers_mut() = entry.headers.clone();
    stamp(&mut response, status);
    response
}

fn stamp(response: &mut Response, status: CacheStatus) {
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, status.header_value());
}

/// Stream the origin body through untouched, keeping a copy for capture.
///
/// The capture is queued only after the last chunk has been handed to the
/// client. An aborted or failed body is never captured, and a body larger than
/// [`MAX_CAPTURE_BYTES`] stops being buffered once it crosses the limit.
fn capture_after_delivery(cache: Arc<PageCache>, key: CacheKey, response: Response) -> Response {
    if !capture::is_candidate(response.status(), response.headers()) {
        return response;
    }

    let (parts, body) = response.into_parts();
    let headers = capture::replay_headers(&parts.headers);
    let mut chunks = body.into_data_stream();

    let tee = async_stream::stream! {
        let mut buffered = Some(BytesMut::new());
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    let overflow = buffered
                        .as_ref()
                        .is_some_and(|buf| buf.len() + bytes.len() > MAX_CAPTURE_BYTES);
                    if overflow {
                        buffered = None;
                        counter!("pagecache_capture_total", "outcome" => "too_large").increment(1);
                        debug!(
                            key = %key,
                            outcome = "too_large",
                            limit = MAX_CAPTURE_BYTES,
                            "page exceeds capture limit, skipping capture"
                        );
                    } else if let Some(buf) = buffered.as_mut() {
                        buf.extend_from_slice(&bytes);
                    }
                    yield Ok::<_, axum::Error>(bytes);
                }
                Err(err) => {
                    debug!(key = %key, error = %err, "origin body failed, skipping capture");
                    yield Err(err);
                    return;
                }
            }
        }
        if let Some(buffered) = buffered {
            spawn_capture(cache, key, headers, buffered.freeze());
        }
    };

    Response::from_parts(parts, Body::from_stream(tee))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::{HeaderValue, StatusCode, header};
    use bytes::Bytes;
    use http_body_util::BodyExt;

    use super::*;

    fn html_response(body: Body) -> Response {
        let mut response = Response::new(body);
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        response
    }

    const PAGE: &str = concat!(
        "<html><body>",
        r#"<script id="__PAGE_DATA__">{}</script>"#,
        r#"<script id="__REQUEST_CONTEXT__">{}</script>"#,
        "</body></html>"
    );

    #[tokio::test]
    async fn failed_origin_body_reaches_client_and_is_not_captured() {
        let cache = Arc::new(PageCache::new(crate::cache::CacheConfig::from_limits(2, 2).unwrap()));
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(PAGE.as_bytes())),
            Err(std::io::Error::other("renderer crashed")),
        ];
        let response = html_response(Body::from_stream(futures::stream::iter(chunks)));

        let response = capture_after_delivery(Arc::clone(&cache), CacheKey::from("/broken"), response);
        assert!(response.into_body().collect().await.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.decoded().is_empty());
        assert!(cache.compressed().is_empty());
    }

    #[tokio::test]
    async fn oversized_body_is_streamed_but_not_captured() {
        let cache = Arc::new(PageCache::new(crate::cache::CacheConfig::from_limits(2, 2).unwrap()));
        let filler = "x".repeat(MAX_CAPTURE_BYTES);
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(PAGE.as_bytes())),
            Ok(Bytes::from(filler)),
        ];
        let response = html_response(Body::from_stream(futures::stream::iter(chunks)));

        let response = capture_after_delivery(Arc::clone(&cache), CacheKey::from("/huge"), response);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.len(), PAGE.len() + MAX_CAPTURE_BYTES);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.decoded().is_empty());
        assert!(cache.compressed().is_empty());
    }

    #[test]
    fn stamp_overwrites_upstream_status_header() {
        let mut response = Response::new(Body::empty());
        response
            .headers_mut()
            .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("hit"));

        stamp(&mut response, CacheStatus::Miss);

        assert_eq!(response.headers().get_all(CACHE_STATUS_HEADER).iter().count(), 1);
        assert_eq!(response.headers().get(CACHE_STATUS_HEADER).unwrap(), "miss");
    }

    #[test]
    fn non_candidates_are_returned_unwrapped() {
        let cache = Arc::new(PageCache::new(crate::cache::CacheConfig::from_limits(1, 1).unwrap()));
        let mut response = Response::new(Body::from("{}"));
        *response.status_mut() = StatusCode::OK;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("2"));

        let response = capture_after_delivery(cache, CacheKey::from("/api"), response);
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "2");
    }
}
