//! Spell page parser.
use super::{decode_entities, html_to_text};
use crate::spelltext::resolve_plurals;
use regex::Regex;
use std::sync::LazyLock;

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<title>(.*?) - Spells").unwrap());
static DESCRIPTION_CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<th>Description</th></tr><tr><td[^>]*>(.*?)</td></tr>").unwrap());
static TRIGGER_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"((Use|Equip): .*?)(<br>|</div>|</td>|<table|</tr>)").unwrap());
static YELLOW_SPAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<span class="q">([^<]+)</span>"#).unwrap());

/// Name and plain-text description from a spell page. Both are empty when
/// the page carries nothing recognizable.
pub fn parse_spell(content: &str) -> (String, String) {
    let name = TITLE_RE
        .captures(content)
        .map(|c| decode_entities(c[1].trim()))
        .unwrap_or_default();

    let raw = if let Some(caps) = DESCRIPTION_CELL_RE.captures(content) {
        caps[1].to_string()
    } else if let Some(caps) = TRIGGER_TEXT_RE.captures(content) {
        caps[1].to_string()
    } else {
        // Longest yellow span that is neither tiny nor a rank label
        YELLOW_SPAN_RE
            .captures_iter(content)
            .map(|c| c[1].to_string())
            .filter(|text| text.len() > 5 && !text.contains("Rank"))
            .fold(String::new(), |best, text| {
                if text.len() > best.len() { text } else { best }
            })
    };

    let description = if raw.is_empty() {
        raw
    } else {
        resolve_plurals(&html_to_text(&raw))
    };
    (name, description)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_cell() {
        let page = "<title>Throw Corrosive Vial - Spells - Turtle WoW Database</title>\
            <table><tr><th>Description</th></tr><tr><td style=\"padding-top: 5px;\">Throw a vial<br>dealing <b>50</b> damage.</td></tr></table>";
        let (name, description) = parse_spell(page);
        assert_eq!(name, "Throw Corrosive Vial");
        assert_eq!(description, "Throw a vial\ndealing 50 damage.");
    }

    #[test]
    fn test_trigger_text_fallback() {
        let page = "<title>Poisons - Spells - Turtle WoW Database</title><div>Equip: Poisons +5.</div>";
        let (name, description) = parse_spell(page);
        assert_eq!(name, "Poisons");
        assert_eq!(description, "Equip: Poisons +5.");
    }

    #[test]
    fn test_yellow_span_fallback() {
        let page = r#"<title>Odd Spell - Spells - Turtle WoW Database</title>
            <span class="q">Rank 3</span>
            <span class="q">Short</span>
            <span class="q">Removes 1 poison $leffect:effects;.</span>
            <span class="q">Heals a bit.</span>"#;
        let (_, description) = parse_spell(page);
        assert_eq!(description, "Removes 1 poison effect.");
    }

    #[test]
    fn test_empty_page() {
        assert_eq!(parse_spell("<html></html>"), (String::new(), String::new()));
    }
}
