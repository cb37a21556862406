//! Quest page parser (DOM based).
use crate::db::models::QuestRecord;
use scraper::{ElementRef, Html, Selector};

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Parse a quest page. The title is empty when the page has no quest heading,
/// which callers treat as "quest does not exist".
pub fn parse_quest(content: &str, entry: i64) -> QuestRecord {
    let document = Html::parse_document(content);
    let mut quest = QuestRecord {
        entry,
        ..Default::default()
    };

    if let Some(sel) = selector("h1.heading-size-1") {
        if let Some(heading) = document.select(&sel).next() {
            let title = element_text(heading);
            quest.title = match title.find(" - Quests") {
                Some(idx) if idx > 0 => title[..idx].to_string(),
                _ => title,
            };
        }
    }

    if let Some(sel) = selector("div.infobox li") {
        for li in document.select(&sel) {
            let text = element_text(li);
            if let Some(v) = text.strip_prefix("Level: ") {
                quest.quest_level = v.trim().parse().unwrap_or(0);
            } else if let Some(v) = text.strip_prefix("Requires level: ") {
                quest.min_level = v.trim().parse().unwrap_or(0);
            } else if let Some(v) = text.strip_prefix("Side: ") {
                quest.side = v.trim().to_string();
            } else if let Some(v) = text.strip_prefix("ZoneOrSort: ") {
                quest.zone_or_sort = v.trim().parse().unwrap_or(0);
            }
        }
    }

    if let Some(sel) = selector("h3") {
        for header in document.select(&sel) {
            let body = header
                .next_siblings()
                .find_map(ElementRef::wrap)
                .map(element_text)
                .unwrap_or_default();
            match element_text(header).as_str() {
                "Description" => quest.details = body,
                "Progress" => quest.offer_reward_text = body,
                "Completion" => quest.end_text = body,
                _ => {}
            }
        }
    }

    quest
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>The Missing Courier - Quests - Turtle WoW Database</title></head>
<body>
<h1 class="heading-size-1">The Missing Courier - Quests - Turtle WoW Database</h1>
<div class="infobox"><ul>
  <li>Level: 12</li>
  <li>Requires level: 8</li>
  <li>Side: Alliance</li>
  <li>ZoneOrSort: 1519</li>
  <li>Type: Normal</li>
</ul></div>
<h3>Description</h3>
<div>Find the courier on the road to Goldshire.</div>
<h3>Progress</h3>
<div>Have you found him yet?</div>
<h3>Completion</h3>
<div>Thank you, friend.</div>
<h3>Rewards</h3>
<div>Nothing</div>
</body></html>"#;

    #[test]
    fn test_parse_quest_page() {
        let quest = parse_quest(PAGE, 40123);
        assert_eq!(quest.entry, 40123);
        assert_eq!(quest.title, "The Missing Courier");
        assert_eq!(quest.quest_level, 12);
        assert_eq!(quest.min_level, 8);
        assert_eq!(quest.side, "Alliance");
        assert_eq!(quest.zone_or_sort, 1519);
        assert_eq!(quest.details, "Find the courier on the road to Goldshire.");
        assert_eq!(quest.offer_reward_text, "Have you found him yet?");
        assert_eq!(quest.end_text, "Thank you, friend.");
        assert!(quest.objectives.is_empty());
    }

    #[test]
    fn test_parse_quest_without_heading() {
        let quest = parse_quest("<html><body><p>Quest not found</p></body></html>", 9);
        assert!(quest.title.is_empty());
        assert_eq!(quest.quest_level, 0);
    }

    #[test]
    fn test_parse_quest_bad_numbers() {
        let quest = parse_quest(
            r#"<h1 class="heading-size-1">Odd</h1><div class="infobox"><li>Level: ??</li></div>"#,
            1,
        );
        assert_eq!(quest.title, "Odd");
        assert_eq!(quest.quest_level, 0);
    }
}
