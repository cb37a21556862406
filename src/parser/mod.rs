//! Structural parsers for remote content pages and AtlasLoot addon files.
//!
//! Parsers never fail: anything they cannot recognize is left at its
//! default value, and callers decide whether the result is usable.
pub mod atlas;
pub mod item;
pub mod quest;
pub mod spell;

use regex::Regex;
use scraper::Html;
use std::sync::LazyLock;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Decode HTML character references (`&#039;`, `&amp;`, ...) in a text run.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    Html::parse_fragment(text).root_element().text().collect()
}

/// Turn an HTML snippet into plain text: `<br>` becomes a newline, other
/// tags are dropped, entities are decoded.
pub fn html_to_text(snippet: &str) -> String {
    let text = snippet
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n");
    let text = TAG_RE.replace_all(&text, "");
    decode_entities(text.trim()).trim().to_string()
}

/// Parse a decimal integer capture, 0 when absent or malformed.
pub(crate) fn int(caps: Option<regex::Match<'_>>) -> i64 {
    caps.and_then(|m| m.as_str().parse().ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("Hunter&#039;s Bow"), "Hunter's Bow");
        assert_eq!(decode_entities("Salt &amp; Pepper"), "Salt & Pepper");
        assert_eq!(decode_entities("Plain"), "Plain");
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(
            html_to_text(" Line one<br><span class=\"q\">Line</span> two "),
            "Line one\nLine two"
        );
    }
}
