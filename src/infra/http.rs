//! HTTP surface: the cached proxy router and the request plumbing around it.

use std::{sync::Arc, time::Instant};

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{error, warn};
use uuid::Uuid;

use crate::cache::{
    CACHE_STATUS_HEADER, CacheKey, CacheState, CacheStats, PageCache, PagePatch, PatchSource,
    page_cache_layer,
};

use super::origin::{self, OriginClient};

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Build the public router.
///
/// Everything except the stats endpoint is proxied to the origin renderer
/// behind the page cache layer.
pub fn build_router(cache: CacheState, origin: OriginClient) -> Router {
    let stats = Arc::clone(&cache.cache);

    let proxied = Router::new()
        .fallback(origin::forward)
        .with_state(origin)
        .layer(middleware::from_fn_with_state(cache, page_cache_layer));

    Router::new()
        .route("/_pagecache/stats", get(cache_stats))
        .with_state(stats)
        .fallback_service(proxied)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn cache_stats(State(cache): State<Arc<PageCache>>) -> Json<CacheStats> {
    Json(cache.stats())
}

/// Ensure every request carries an id, echoing it on the response.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = match request.headers().get(&REQUEST_ID_HEADER) {
        Some(value) => value.clone(),
        None => {
            let generated = HeaderValue::from_str(&Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("unknown"));
            request
                .headers_mut()
                .insert(REQUEST_ID_HEADER, generated.clone());
            generated
        }
    };

    let mut response = next.run(request).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request_id(request.headers()).unwrap_or_default().to_string();
    let start = Instant::now();

    let response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let cache_status = response
            .headers()
            .get(CACHE_STATUS_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        if status.is_server_error() {
            error!(
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                cache = cache_status,
                request_id = request_id,
                "request failed",
            );
        } else {
            warn!(
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                cache = cache_status,
                request_id = request_id,
                "client request error",
            );
        }
    }

    response
}

fn request_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
}

/// Refreshes the request context script of cached pages for each request.
///
/// Page data is kept as captured; it only changes when the origin renders the
/// page again.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestContextPatch;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestContextPayload<'a> {
    request_id: String,
    path: &'a str,
    served_at: String,
}

impl PatchSource for RequestContextPatch {
    fn patch_for(&self, key: &CacheKey, request_headers: &HeaderMap) -> PagePatch {
        let payload = RequestContextPayload {
            request_id: request_id(request_headers)
                .map(str::to_owned)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            path: key.as_str(),
            served_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        };

        match serde_json::to_string(&payload) {
            Ok(json) => PagePatch {
                page_data: None,
                request_context: Some(json),
            },
            Err(err) => {
                warn!(key = %key, error = %err, "failed to encode request context");
                PagePatch::default()
            }
        }
    }
}
