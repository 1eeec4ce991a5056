//! Parsed page documents.
//!
//! A [`PageDocument`] is a captured HTML page split into literal text and
//! marker slots. Parsing runs once per capture or promotion; serving a page
//! only concatenates segments, so a hit never re-tokenizes the HTML.
//!
//! Documents are immutable once parsed. Per-request payloads are applied while
//! serializing (see [`super::patch`]), which lets any number of requests share
//! one cached document without coordination.

use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};
use thiserror::Error;

/// Literal prefix of the page-data script tag. Its presence marks a body as a
/// page this cache knows how to patch.
pub const PAGE_DATA_MARKER: &str = r#"<script id="__PAGE_DATA__""#;

/// Literal prefix of the request-context script tag.
pub const REQUEST_CONTEXT_MARKER: &str = r#"<script id="__REQUEST_CONTEXT__""#;

// Private-use code points bracket slot content in the rewritten text.
const SLOT_OPEN: char = '\u{E000}';
const SLOT_CLOSE: char = '\u{E001}';

/// Embedded per-request data payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// Hydration data for the rendered page.
    PageData,
    /// Session and request context injected by the renderer.
    RequestContext,
}

impl Marker {
    pub const ALL: [Marker; 2] = [Marker::PageData, Marker::RequestContext];

    pub fn as_str(self) -> &'static str {
        match self {
            Marker::PageData => "page_data",
            Marker::RequestContext => "request_context",
        }
    }

    pub fn tag_prefix(self) -> &'static str {
        match self {
            Marker::PageData => PAGE_DATA_MARKER,
            Marker::RequestContext => REQUEST_CONTEXT_MARKER,
        }
    }

    fn selector(self) -> &'static str {
        match self {
            Marker::PageData => "script#__PAGE_DATA__",
            Marker::RequestContext => "script#__REQUEST_CONTEXT__",
        }
    }

    fn slot_tag(self) -> char {
        match self {
            Marker::PageData => 'P',
            Marker::RequestContext => 'R',
        }
    }

    fn from_slot_tag(tag: char) -> Option<Self> {
        Marker::ALL.into_iter().find(|marker| marker.slot_tag() == tag)
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("html rewriting failed: {0}")]
    Rewrite(String),
    #[error("document contains reserved slot delimiter characters")]
    ReservedCharacter,
    #[error("`{marker}` script has no closing tag", marker = .0.as_str())]
    UnterminatedSlot(Marker),
    #[error("slot delimiter without a known marker")]
    UnknownSlot,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Slot { marker: Marker, captured: String },
}

#[derive(Debug, Clone)]
pub struct PageDocument {
    segments: Vec<Segment>,
    source_len: usize,
}

impl PageDocument {
    pub fn parse(html: &str) -> Result<Self, DocumentError> {
        if html.contains([SLOT_OPEN, SLOT_CLOSE]) {
            return Err(DocumentError::ReservedCharacter);
        }

        let handlers = Marker::ALL
            .into_iter()
            .map(|marker| {
                let open = format!("{SLOT_OPEN}{}", marker.slot_tag());
                element!(marker.selector(), move |el| {
                    el.prepend(&open, ContentType::Html);
                    el.append(&SLOT_CLOSE.to_string(), ContentType::Html);
                    Ok(())
                })
            })
            .collect();

        let marked = rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: handlers,
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|err| DocumentError::Rewrite(err.to_string()))?;

        Ok(Self {
            segments: split_segments(&marked)?,
            source_len: html.len(),
        })
    }

    /// Number of elements matching `marker` found at parse time.
    pub fn occurrences(&self, marker: Marker) -> usize {
        self.segments
            .iter()
            .filter(|segment| matches!(segment, Segment::Slot { marker: m, .. } if *m == marker))
            .count()
    }

    /// Serialize the document, letting `fill` write each slot's content.
    ///
    /// `fill` receives the marker and the content captured with the page.
    pub fn serialize_with<F>(&self, mut fill: F) -> String
    where
        F: FnMut(Marker, &str, &mut String),
    {
        let mut out = String::with_capacity(self.source_len);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot { marker, captured } => fill(*marker, captured, &mut out),
            }
        }
        out
    }

    /// The captured page, byte for byte.
    pub fn to_html(&self) -> String {
        self.serialize_with(|_, captured, out| out.push_str(captured))
    }
}

fn split_segments(marked: &str) -> Result<Vec<Segment>, DocumentError> {
    let mut segments = Vec::new();
    let mut rest = marked;

    while let Some(start) = rest.find(SLOT_OPEN) {
        if start > 0 {
            segments.push(Segment::Literal(rest[..start].to_string()));
        }
        let tail = &rest[start + SLOT_OPEN.len_utf8()..];
        let tag = tail.chars().next().ok_or(DocumentError::UnknownSlot)?;
        let marker = Marker::from_slot_tag(tag).ok_or(DocumentError::UnknownSlot)?;
        let body = &tail[tag.len_utf8()..];
        let end = body
            .find(SLOT_CLOSE)
            .ok_or(DocumentError::UnterminatedSlot(marker))?;
        segments.push(Segment::Slot {
            marker,
            captured: body[..end].to_string(),
        });
        rest = &body[end + SLOT_CLOSE.len_utf8()..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = concat!(
        "<!DOCTYPE html><html><head><title>A &amp; B</title></head><body>",
        "<main class=x>Hello <b>world</b></main>",
        r#"<script id="__PAGE_DATA__" type="application/json">{"props":{"n":1}}</script>"#,
        r#"<script id="__REQUEST_CONTEXT__">window.ctx={"user":"a"}</script>"#,
        "</body></html>"
    );

    #[test]
    fn parse_finds_each_marker_once() {
        let document = PageDocument::parse(PAGE).expect("parse");
        assert_eq!(document.occurrences(Marker::PageData), 1);
        assert_eq!(document.occurrences(Marker::RequestContext), 1);
    }

    #[test]
    fn serialization_preserves_source_text() {
        let document = PageDocument::parse(PAGE).expect("parse");
        assert_eq!(document.to_html(), PAGE);
    }

    #[test]
    fn slots_capture_script_content() {
        let document = PageDocument::parse(PAGE).expect("parse");
        let mut seen = Vec::new();
        document.serialize_with(|marker, captured, _| seen.push((marker, captured.to_string())));
        assert_eq!(
            seen,
            vec![
                (Marker::PageData, r#"{"props":{"n":1}}"#.to_string()),
                (Marker::RequestContext, r#"window.ctx={"user":"a"}"#.to_string()),
            ]
        );
    }

    #[test]
    fn missing_and_duplicate_markers_are_counted() {
        let html = concat!(
            r#"<script id="__PAGE_DATA__">1</script>"#,
            r#"<script id="__PAGE_DATA__">2</script>"#
        );
        let document = PageDocument::parse(html).expect("parse");
        assert_eq!(document.occurrences(Marker::PageData), 2);
        assert_eq!(document.occurrences(Marker::RequestContext), 0);
        assert_eq!(document.to_html(), html);
    }

    #[test]
    fn empty_script_yields_empty_slot() {
        let html = r#"<p>x</p><script id="__REQUEST_CONTEXT__"></script>"#;
        let document = PageDocument::parse(html).expect("parse");
        assert_eq!(document.occurrences(Marker::RequestContext), 1);
        assert_eq!(document.to_html(), html);
    }

    #[test]
    fn reserved_characters_are_rejected() {
        let html = "<p>\u{E000}</p>";
        assert!(matches!(
            PageDocument::parse(html),
            Err(DocumentError::ReservedCharacter)
        ));
    }
}
