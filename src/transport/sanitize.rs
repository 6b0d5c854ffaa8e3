//! Upstream error text cleanup.
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::util::truncate_chars;

/// Replacement for an HTML document with neither a title nor a paragraph.
pub const HTML_REDACTED: &str = "[html error page]";
const MAX_ERROR_LEN: usize = 500;

static TITLE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title\s*>").ok());
static PARAGRAPH_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<p(?:\s[^>]*)?>(.*?)</p\s*>").ok());
static DROP_BLOCK_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|head)[^>]*>.*?</(script|style|head)\s*>").ok()
});
static TAG_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").ok());

/// Reduce HTML error text to something fit for an error message.
///
/// Text without tags only has its whitespace collapsed. An `<html>` document becomes
/// `"<title>: <first paragraph>"`, either half alone when the other is
/// missing, or [`HTML_REDACTED`] when both are. Any other markup is
/// stripped to its text.
#[must_use]
pub fn strip_html(text: &str) -> String {
    if !text.contains('<') {
        return collapse_whitespace(text);
    }

    if is_html_document(text) {
        let title = capture_text(&TITLE_RE, text);
        let paragraph = capture_text(&PARAGRAPH_RE, text);
        return match (title, paragraph) {
            (Some(title), Some(paragraph)) => format!("{title}: {paragraph}"),
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => HTML_REDACTED.to_owned(),
        };
    }

    let without_blocks = match DROP_BLOCK_RE.as_ref() {
        Some(re) => re.replace_all(text, " ").into_owned(),
        None => text.to_owned(),
    };
    plain_text(&without_blocks)
}

/// Turn an upstream error body into a short, operator-safe message.
///
/// Prefers `error.message` (or a string `error`, or a top-level `message`)
/// from a JSON body; otherwise the lossy UTF-8 text goes through
/// [`strip_html`]. The result is capped at 500 bytes.
#[must_use]
pub fn sanitize_upstream_error(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        let message = json
            .get("error")
            .and_then(|error| error.get("message").or(Some(error)))
            .and_then(serde_json::Value::as_str)
            .or_else(|| json.get("message").and_then(serde_json::Value::as_str));
        if let Some(message) = message {
            return truncate_chars(message, MAX_ERROR_LEN);
        }
    }

    let raw = String::from_utf8_lossy(body);
    truncate_chars(strip_html(raw.trim()).trim(), MAX_ERROR_LEN)
}

fn is_html_document(text: &str) -> bool {
    let head = text.get(..text.len().min(1024)).unwrap_or(text);
    let lower = head.to_ascii_lowercase();
    lower.contains("<html") || lower.contains("<!doctype html")
}

fn capture_text(re: &LazyLock<Option<Regex>>, text: &str) -> Option<String> {
    let inner = re.as_ref()?.captures(text)?.get(1)?.as_str();
    let cleaned = plain_text(inner);
    (!cleaned.is_empty()).then_some(cleaned)
}

fn plain_text(fragment: &str) -> String {
    let untagged = match TAG_RE.as_ref() {
        Some(re) => re.replace_all(fragment, " ").into_owned(),
        None => fragment.to_owned(),
    };
    collapse_whitespace(&decode_entities(&untagged))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_owned();
    }
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
