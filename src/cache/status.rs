use axum::http::{HeaderName, HeaderValue};

/// Response header reporting how the page cache handled a request.
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-page-cache");

/// Disposition written to [`CACHE_STATUS_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the decoded tier.
    Hit,
    /// Rendered by the origin.
    Miss,
    /// Promoted from the compressed tier, then served.
    Transferring,
    /// Population is switched off.
    Disabled,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Transferring => "transferring",
            CacheStatus::Disabled => "disabled",
        }
    }

    pub fn header_value(self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}
