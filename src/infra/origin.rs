//! Upstream renderer client.
//!
//! Forwards requests the page cache could not serve to the origin renderer
//! and relays its response unchanged apart from hop-by-hop headers.

use axum::{
    body::{Body, Bytes, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::BytesMut;
use http_body_util::LengthLimitError;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::config::OriginSettings;

use super::error::InfraError;

const MAX_FORWARDED_BODY_BYTES: usize = 10 * 1024 * 1024;

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Clone)]
pub struct OriginClient {
    client: reqwest::Client,
    base: Url,
    max_body_bytes: usize,
}

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("failed to read request body: {0}")]
    RequestBody(#[from] axum::Error),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("upstream response exceeds {limit} bytes")]
    UpstreamTooLarge { limit: usize },
}

impl IntoResponse for OriginError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            OriginError::RequestBody(err) if is_length_limit(err) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
            }
            OriginError::RequestBody(_) => (StatusCode::BAD_REQUEST, "Failed to read request body"),
            OriginError::Upstream(_) => (StatusCode::BAD_GATEWAY, "Upstream renderer unavailable"),
            OriginError::UpstreamTooLarge { .. } => {
                (StatusCode::BAD_GATEWAY, "Upstream response too large")
            }
        };
        (status, message).into_response()
    }
}

fn is_length_limit(err: &axum::Error) -> bool {
    std::error::Error::source(err).is_some_and(|source| source.is::<LengthLimitError>())
}

impl OriginClient {
    pub fn new(settings: &OriginSettings) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::origin(format!("failed to build client: {err}")))?;
        Ok(Self {
            client,
            base: settings.url.clone(),
            max_body_bytes: settings.max_body_bytes,
        })
    }

    /// Request path and query joined onto the base URL, keeping any base path prefix.
    fn target(&self, request: &Request) -> Url {
        let mut url = self.base.clone();
        let prefix = self.base.path().trim_end_matches('/');
        url.set_path(&format!("{prefix}{}", request.uri().path()));
        url.set_query(request.uri().query());
        url
    }

    async fn read_body(
        &self,
        target: &Url,
        mut upstream: reqwest::Response,
    ) -> Result<Bytes, OriginError> {
        let limit = self.max_body_bytes;
        if upstream
            .content_length()
            .is_some_and(|len| len > limit as u64)
        {
            warn!(url = %target, limit, "origin body exceeds limit");
            return Err(OriginError::UpstreamTooLarge { limit });
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = upstream
            .chunk()
            .await
            .inspect_err(|err| warn!(url = %target, error = %err, "origin body failed"))?
        {
            if body.len() + chunk.len() > limit {
                warn!(url = %target, limit, "origin body exceeds limit");
                return Err(OriginError::UpstreamTooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

/// Fallback handler relaying a request to the origin renderer.
pub async fn forward(
    State(origin): State<OriginClient>,
    request: Request,
) -> Result<Response, OriginError> {
    let target = origin.target(&request);
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_FORWARDED_BODY_BYTES).await?;

    let mut headers = strip_hop_by_hop(&parts.headers);
    headers.remove(header::HOST);
    // Captured pages must be plain text, so the renderer is asked for identity bodies.
    headers.remove(header::ACCEPT_ENCODING);

    let upstream = origin
        .client
        .request(parts.method, target.clone())
        .headers(headers)
        .body(body)
        .send()
        .await
        .inspect_err(|err| warn!(url = %target, error = %err, "origin request failed"))?;

    let status = upstream.status();
    let headers = strip_hop_by_hop(upstream.headers());
    let bytes = origin.read_body(&target, upstream).await?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response.headers_mut().remove(header::CONTENT_LENGTH);
    Ok(response)
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut kept = headers.clone();
    for name in HOP_BY_HOP {
        kept.remove(name);
    }
    kept
}
