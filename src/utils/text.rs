//! Text processing utilities.

use std::sync::LazyLock;

use regex::Regex;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>|<[^>]+>").expect("valid regex")
});

static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("valid regex"));

/// Check if content has any text worth embedding (not just whitespace/punctuation).
pub fn has_meaningful_content(content: &str) -> bool {
    content.chars().any(char::is_alphanumeric)
}

/// Strip markup from an HTML document, keeping its text.
pub fn strip_html_tags(html: &str) -> String {
    let text = TAG_RE.replace_all(html, "\n");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    BLANK_LINES_RE.replace_all(&text, "\n\n").trim().to_string()
}
