//! Per-request document patching.
//!
//! A cached page carries payloads that belong to the request that rendered it.
//! Before a cached document is served, each marker slot is refilled with the
//! current request's payload. Each marker is expected exactly once; any other
//! count is reported and the page is still served.

use axum::http::HeaderMap;
use metrics::counter;
use tracing::warn;

use super::document::{Marker, PageDocument};
use super::keys::CacheKey;

/// Payloads for the current request. `None` keeps the captured content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagePatch {
    pub page_data: Option<String>,
    pub request_context: Option<String>,
}

impl PagePatch {
    pub fn payload(&self, marker: Marker) -> Option<&str> {
        match marker {
            Marker::PageData => self.page_data.as_deref(),
            Marker::RequestContext => self.request_context.as_deref(),
        }
    }
}

/// Supplies the payloads patched into a cached page for one request.
pub trait PatchSource: Send + Sync {
    fn patch_for(&self, key: &CacheKey, request_headers: &HeaderMap) -> PagePatch;
}

/// Serves cached pages with the payloads they were captured with.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepCaptured;

impl PatchSource for KeepCaptured {
    fn patch_for(&self, _key: &CacheKey, _request_headers: &HeaderMap) -> PagePatch {
        PagePatch::default()
    }
}

/// A marker that did not occur exactly once in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructuralViolation {
    pub marker: Marker,
    pub occurrences: usize,
}

#[derive(Debug, Clone)]
pub struct PatchedPage {
    pub html: String,
    pub violations: Vec<StructuralViolation>,
}

/// Render `document` with `patch` applied to every marker slot.
///
/// The document itself is left untouched, so applying a patch any number of
/// times yields the same output for the same payloads.
pub fn apply_patch(document: &PageDocument, patch: &PagePatch) -> PatchedPage {
    let violations = Marker::ALL
        .into_iter()
        .filter_map(|marker| {
            let occurrences = document.occurrences(marker);
            (occurrences != 1).then_some(StructuralViolation {
                marker,
                occurrences,
            })
        })
        .collect();

    let html = document.serialize_with(|marker, captured, out| match patch.payload(marker) {
        Some(payload) => push_script_payload(out, payload),
        None => out.push_str(captured),
    });

    PatchedPage { html, violations }
}

/// Log and count violations found while patching the page for `key`.
pub fn report_violations(key: &CacheKey, violations: &[StructuralViolation]) {
    for violation in violations {
        counter!(
            "pagecache_patch_violation_total",
            "marker" => violation.marker.as_str()
        )
        .increment(1);
        warn!(
            key = %key,
            marker = violation.marker.as_str(),
            occurrences = violation.occurrences,
            "cached page does not contain exactly one marker; serving best effort"
        );
    }
}

// `</` inside a script payload would end the element early.
fn push_script_payload(out: &mut String, payload: &str) {
    let mut rest = payload;
    while let Some(index) = rest.find("</") {
        out.push_str(&rest[..index]);
        out.push_str("<\\/");
        rest = &rest[index + 2..];
    }
    out.push_str(rest);
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = concat!(
        "<html><body><h1>Post</h1>",
        r#"<script id="__PAGE_DATA__">{"user":"first"}</script>"#,
        r#"<script id="__REQUEST_CONTEXT__">{"rid":"1"}</script>"#,
        "</body></html>"
    );

    fn patch(page_data: &str, request_context: &str) -> PagePatch {
        PagePatch {
            page_data: Some(page_data.to_string()),
            request_context: Some(request_context.to_string()),
        }
    }

    #[test]
    fn patch_replaces_only_marker_content() {
        let document = PageDocument::parse(PAGE).unwrap();
        let patched = apply_patch(&document, &patch(r#"{"user":"second"}"#, r#"{"rid":"2"}"#));

        assert!(patched.violations.is_empty());
        assert_eq!(
            patched.html,
            PAGE.replace(r#"{"user":"first"}"#, r#"{"user":"second"}"#)
                .replace(r#"{"rid":"1"}"#, r#"{"rid":"2"}"#)
        );
    }

    #[test]
    fn keep_captured_serves_original_page() {
        let document = PageDocument::parse(PAGE).unwrap();
        let headers = HeaderMap::new();
        let source = KeepCaptured.patch_for(&CacheKey::from("/"), &headers);
        assert_eq!(apply_patch(&document, &source).html, PAGE);
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let document = PageDocument::parse(PAGE).unwrap();
        let payloads = patch("1", "2");
        let first = apply_patch(&document, &payloads);
        let second = apply_patch(&document, &payloads);

        assert_eq!(first.html, second.html);
        assert_eq!(document.occurrences(Marker::PageData), 1);
        assert_eq!(document.occurrences(Marker::RequestContext), 1);
    }

    #[test]
    fn missing_marker_reported_once_per_application() {
        let html = r#"<p>x</p><script id="__PAGE_DATA__">{}</script>"#;
        let document = PageDocument::parse(html).unwrap();
        let payloads = patch("new", "ctx");

        for _ in 0..2 {
            let patched = apply_patch(&document, &payloads);
            assert_eq!(
                patched.violations,
                vec![StructuralViolation {
                    marker: Marker::RequestContext,
                    occurrences: 0,
                }]
            );
            assert_eq!(patched.html, r#"<p>x</p><script id="__PAGE_DATA__">new</script>"#);
        }
    }

    #[test]
    fn duplicated_marker_is_patched_everywhere_and_reported() {
        let html = concat!(
            r#"<script id="__PAGE_DATA__">a</script>"#,
            r#"<script id="__PAGE_DATA__">b</script>"#,
            r#"<script id="__REQUEST_CONTEXT__">c</script>"#
        );
        let document = PageDocument::parse(html).unwrap();
        let patched = apply_patch(&document, &patch("z", "y"));

        assert_eq!(patched.violations.len(), 1);
        assert_eq!(patched.violations[0].marker, Marker::PageData);
        assert_eq!(patched.violations[0].occurrences, 2);
        assert_eq!(patched.html.matches(">z</script>").count(), 2);
    }

    #[test]
    fn payload_cannot_close_the_script_element() {
        let document = PageDocument::parse(PAGE).unwrap();
        let patched = apply_patch(&document, &patch("</script><b>", "{}"));
        assert!(patched.html.contains(r#"<script id="__PAGE_DATA__"><\/script><b></script>"#));
    }
}
