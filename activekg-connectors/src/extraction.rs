//! Format-specific text extraction with size and binary caps.

use std::sync::OnceLock;

use activekg_core::{Error, Result};
use regex::Regex;

/// Hard cap on raw bytes accepted from a connector fetch.
pub const MAX_FETCH_BYTES: usize = 8 * 1024 * 1024;

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<script.*?</script>|<style.*?</style>|<[^>]+>").expect("static regex"))
}

fn title_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("static regex"))
}

fn looks_like_html(content_type: Option<&str>, head: &str) -> bool {
    if content_type.is_some_and(|ct| ct.contains("text/html")) {
        return true;
    }
    let head = head.trim_start().to_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

fn looks_binary(content_type: Option<&str>, bytes: &[u8]) -> bool {
    if let Some(ct) = content_type {
        let ct = ct.to_lowercase();
        if ct.starts_with("application/pdf")
            || ct.contains("officedocument")
            || ct.starts_with("application/octet-stream")
            || ct.starts_with("image/")
            || ct.starts_with("audio/")
            || ct.starts_with("video/")
        {
            return true;
        }
    }
    bytes.iter().take(512).any(|b| *b == 0)
}

/// Extract `(text, title)` from fetched bytes.
///
/// HTML is stripped to text with the `<title>` captured; other text passes
/// through as UTF-8. Binary formats (PDF, DOCX, images, NUL-bearing
/// payloads) are rejected as permanently unprocessable, and inputs over
/// [`MAX_FETCH_BYTES`] are refused.
pub fn extract_text(
    bytes: &[u8],
    content_type: Option<&str>,
    max_chars: usize,
) -> Result<(String, Option<String>)> {
    if bytes.len() > MAX_FETCH_BYTES {
        return Err(Error::PermanentConnector(format!(
            "payload of {} bytes exceeds cap of {MAX_FETCH_BYTES}",
            bytes.len()
        )));
    }
    if looks_binary(content_type, bytes) {
        return Err(Error::PermanentConnector(format!(
            "unsupported binary format ({})",
            content_type.unwrap_or("unknown")
        )));
    }

    let raw = String::from_utf8_lossy(bytes);
    let head: String = raw.chars().take(256).collect();

    let (text, title) = if looks_like_html(content_type, &head) {
        let title = title_regex()
            .captures(&raw)
            .map(|c| c[1].trim().to_string())
            .filter(|t| !t.is_empty());
        let stripped = tag_regex().replace_all(&raw, " ");
        let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        (collapsed, title)
    } else {
        (raw.into_owned(), None)
    };

    let truncated: String = text.chars().take(max_chars).collect();
    Ok((truncated, title))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let (text, title) = extract_text(b"hello world", Some("text/plain"), 1000).unwrap();
        assert_eq!(text, "hello world");
        assert!(title.is_none());
    }

    #[test]
    fn html_is_stripped_and_titled() {
        let html = b"<!DOCTYPE html><html><head><title>My Doc</title>\
            <style>p{color:red}</style></head>\
            <body><p>First para.</p><script>alert(1)</script><p>Second.</p></body></html>";
        let (text, title) = extract_text(html, Some("text/html"), 1000).unwrap();
        assert_eq!(title.as_deref(), Some("My Doc"));
        assert!(text.contains("First para."));
        assert!(text.contains("Second."));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color:red"));
    }

    #[test]
    fn pdf_and_nul_bytes_are_rejected() {
        assert!(matches!(
            extract_text(b"%PDF-1.7 ...", Some("application/pdf"), 1000),
            Err(Error::PermanentConnector(_))
        ));
        assert!(matches!(
            extract_text(b"ab\0cd", None, 1000),
            Err(Error::PermanentConnector(_))
        ));
    }

    #[test]
    fn text_is_truncated_at_char_cap() {
        let long = "x".repeat(500);
        let (text, _) = extract_text(long.as_bytes(), Some("text/plain"), 100).unwrap();
        assert_eq!(text.chars().count(), 100);
    }
}
