//! Item page parser.
//!
//! Recovers an `item_template` row, the item's set and the NPCs that drop it
//! from a rendered item page using plain pattern matching.
use super::{decode_entities, int};
use crate::db::models::{ItemSet, ItemSpell, ItemStat, ItemTemplate};
use crate::spelltext::resolve_plurals;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<title>([^<]+) - Items - Turtle WoW Database</title>").unwrap());
static DISPLAY_CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Display ID:\s*</td>\s*<td[^>]*>(\d+)").unwrap());
static DISPLAY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Display ID:\s*(\d+)").unwrap());
static LEVEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Level:\s*(\d+)").unwrap());
static UNIQUE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Unique \((\d+)\)").unwrap());
static SLOT_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<td>([^<]+)</td><th>([^<]+)</th>").unwrap());
static BAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)\s+Slot\s+(.*)Bag").unwrap());
static ARMOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)\s*Armor").unwrap());
static REQ_LEVEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Requires Level\s*(\d+)").unwrap());
static DURABILITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Durability\s*(\d+)\s*/\s*(\d+)").unwrap());
static SPEED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Speed\s*(\d+\.?\d*)").unwrap());
static DAMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*-\s*(\d+)\s*(\w*)\s*Damage").unwrap());
static SPELL_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<a href="[?&]spell=(\d+)"[^>]*>([^<]+)</a>"#).unwrap());
static ITEMSET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\?itemset=(\d+)").unwrap());
static FLAVOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<span class="q">"([^"]+)"</span>"#).unwrap());
static GOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\d+)<span class="moneygold">"#).unwrap());
static SILVER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\d+)<span class="moneysilver">"#).unwrap());
static COPPER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\d+)<span class="moneycopper">"#).unwrap());
static SET_BONUS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((\d+)\) Set:").unwrap());
static ITEM_LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\?item=(\d+)").unwrap());
static SPELL_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\?spell=(\d+)").unwrap());
static LISTVIEW_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"id:\s*(\d+)").unwrap());

/// Primary stats in extraction order.
const STATS: [(&str, i64); 5] = [
    ("Stamina", 7),
    ("Intellect", 5),
    ("Spirit", 6),
    ("Agility", 3),
    ("Strength", 4),
];

/// Resistance labels in `ItemTemplate::resistances` order.
const RESISTANCES: [&str; 6] = [
    "Holy Resistance",
    "Fire Resistance",
    "Nature Resistance",
    "Frost Resistance",
    "Shadow Resistance",
    "Arcane Resistance",
];

const CLASSES: [(&str, i64); 9] = [
    ("Warrior", 1),
    ("Paladin", 2),
    ("Hunter", 4),
    ("Rogue", 8),
    ("Priest", 16),
    ("Shaman", 64),
    ("Mage", 128),
    ("Warlock", 256),
    ("Druid", 1024),
];

const SPELL_LOOKBACK: usize = 200;
const BONUS_WINDOW: usize = 300;
const SET_ITEMS_WINDOW: usize = 2000;

/// Everything recovered from one item page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedItem {
    pub item: ItemTemplate,
    pub item_set: Option<ItemSet>,
    /// Link text of each on-use/equip/proc spell, used when the spell's own
    /// page carries no description.
    pub spell_descriptions: HashMap<i64, String>,
    pub dropped_by: Vec<i64>,
}

/// True when the page is the remote's "no such item" page.
pub fn is_missing_page(content: &str) -> bool {
    content.contains("Item not found") || content.contains("This item doesn't exist")
}

/// Parse an item page. `None` only for the remote's not-found page; a page
/// without a recognizable title yields an item with an empty name.
pub fn parse_item(content: &str, entry: i64) -> Option<ParsedItem> {
    if is_missing_page(content) {
        return None;
    }

    // Unknown restrictions stay 0 so a merge keeps the stored mask.
    let mut item = ItemTemplate {
        entry,
        ..Default::default()
    };

    if let Some(caps) = TITLE_RE.captures(content) {
        item.name = decode_entities(caps[1].trim());
    }

    item.display_id = int(DISPLAY_CELL_RE.captures(content).and_then(|c| c.get(1)));
    if item.display_id == 0 {
        item.display_id = int(DISPLAY_RE.captures(content).and_then(|c| c.get(1)));
    }
    item.item_level = int(LEVEL_RE.captures(content).and_then(|c| c.get(1)));
    item.quality = parse_quality(content, &item.name);

    if content.contains("Unique") {
        item.max_count = match UNIQUE_RE.captures(content) {
            Some(caps) => int(caps.get(1)),
            None => 1,
        };
    }

    parse_slot(content, &mut item);

    item.armor = int(ARMOR_RE.captures(content).and_then(|c| c.get(1)));
    if item.class == 0 && item.armor > 0 {
        item.class = 4;
    }
    item.required_level = int(REQ_LEVEL_RE.captures(content).and_then(|c| c.get(1)));
    item.max_durability = int(DURABILITY_RE.captures(content).and_then(|c| c.get(2)));
    item.bonding = if content.contains("Binds when picked up") {
        1
    } else if content.contains("Binds when equipped") {
        2
    } else if content.contains("Binds when used") {
        3
    } else {
        0
    };

    let mut slot = 0;
    for (label, stat_type) in STATS {
        let Ok(re) = Regex::new(&format!(r"\+(\d+)\s*{label}")) else {
            continue;
        };
        if let Some(caps) = re.captures(content) {
            item.stats[slot] = ItemStat {
                stat_type,
                value: int(caps.get(1)),
            };
            slot += 1;
        }
    }

    if let Some(speed) = SPEED_RE
        .captures(content)
        .and_then(|c| c[1].parse::<f64>().ok())
    {
        item.delay = (speed * 1000.0).round() as i64;
    }
    if let Some(caps) = DAMAGE_RE.captures(content) {
        item.dmg_min = caps[1].parse().unwrap_or(0.0);
        item.dmg_max = caps[2].parse().unwrap_or(0.0);
        item.dmg_type = damage_school(&caps[3]);
    }

    let spell_descriptions = parse_item_spells(content, &mut item);

    if let Some(caps) = FLAVOR_RE.captures(content) {
        item.description = caps[1].to_string();
    }

    if content.contains("Sells for") {
        let gold = int(GOLD_RE.captures(content).and_then(|c| c.get(1)));
        let silver = int(SILVER_RE.captures(content).and_then(|c| c.get(1)));
        let copper = int(COPPER_RE.captures(content).and_then(|c| c.get(1)));
        item.sell_price = copper + silver * 100 + gold * 10_000;
    }

    for (i, label) in RESISTANCES.iter().enumerate() {
        let Ok(re) = Regex::new(&format!(r"\+(\d+)\s*{label}")) else {
            continue;
        };
        item.resistances[i] = int(re.captures(content).and_then(|c| c.get(1)));
    }

    if let Some(mask) = parse_class_mask(content) {
        item.allowable_class = mask;
    }

    let mut item_set = None;
    if let Some(caps) = ITEMSET_RE.captures(content) {
        item.set_id = int(caps.get(1));
        item_set = Some(parse_item_set(content, item.set_id));
    }

    Some(ParsedItem {
        dropped_by: listview_ids(content, "dropped-by"),
        item,
        item_set,
        spell_descriptions,
    })
}

/// Quality from the colour class of the element carrying the item name.
fn parse_quality(content: &str, name: &str) -> i64 {
    if name.is_empty() {
        return 0;
    }
    let escaped = regex::escape(name);
    for quality in (0..=6).rev() {
        let pattern = format!(r#"<b class="q{quality}"[^>]*>{escaped}"#);
        if Regex::new(&pattern).is_ok_and(|re| re.is_match(content)) {
            return quality;
        }
    }
    for quality in (1..=6).rev() {
        if content.contains(&format!(r#"<h1 class="q{quality}""#)) {
            return quality;
        }
    }
    0
}

/// Inventory slot, class and subclass from the tooltip's slot/type row,
/// with fallbacks for slots that carry no type and for bags.
fn parse_slot(content: &str, item: &mut ItemTemplate) {
    if let Some(caps) = SLOT_TYPE_RE.captures(content) {
        item.inventory_type = inventory_type(caps[1].trim());
        (item.class, item.subclass) = item_class(caps[2].trim());
    }

    if item.inventory_type == 0 {
        let lower = content.to_lowercase();
        let fallback = if lower.contains("<td>trinket") {
            Some((12, 0))
        } else if lower.contains("<td>neck") {
            Some((2, 0))
        } else if lower.contains("<td>finger") {
            Some((11, 0))
        } else if lower.contains("<td>back") {
            Some((16, 1))
        } else if lower.contains("<td>shield") {
            Some((14, 6))
        } else if lower.contains("held in off-hand") {
            Some((23, 0))
        } else if ["<td>relic", "<td>libram", "<td>idol", "<td>totem"]
            .iter()
            .any(|p| lower.contains(p))
        {
            Some((28, 0))
        } else {
            None
        };
        if let Some((inventory_type, subclass)) = fallback {
            item.inventory_type = inventory_type;
            item.class = 4;
            item.subclass = subclass;
        }
    }

    if let Some(caps) = BAG_RE.captures(content) {
        item.inventory_type = 18;
        item.class = 1;
        item.container_slots = int(caps.get(1));
        let kind = caps[2].trim();
        item.subclass = [
            ("Soul", 1),
            ("Herb", 2),
            ("Enchant", 3),
            ("Engineering", 4),
            ("Gem", 5),
            ("Mining", 6),
            ("Leatherworking", 7),
        ]
        .iter()
        .find(|(label, _)| kind.contains(label))
        .map_or(0, |(_, subclass)| *subclass);
    }
}

fn inventory_type(slot: &str) -> i64 {
    match slot {
        "Head" => 1,
        "Neck" => 2,
        "Shoulder" => 3,
        "Shirt" => 4,
        "Chest" => 5,
        "Waist" => 6,
        "Legs" => 7,
        "Feet" => 8,
        "Wrists" => 9,
        "Hands" => 10,
        "Finger" => 11,
        "Trinket" => 12,
        "One-Hand" | "One-hand" => 13,
        "Shield" => 14,
        "Ranged" => 15,
        "Back" => 16,
        "Two-Hand" | "Two-hand" => 17,
        "Bag" => 18,
        "Tabard" => 19,
        "Robe" => 20,
        "Main Hand" => 21,
        "Off Hand" => 22,
        "Held In Off-hand" => 23,
        "Ammo" => 24,
        "Thrown" => 25,
        _ => 0,
    }
}

/// (class, subclass) for an armor or weapon type label.
fn item_class(type_name: &str) -> (i64, i64) {
    let armor = match type_name {
        "Cloth" => Some(1),
        "Leather" => Some(2),
        "Mail" => Some(3),
        "Plate" => Some(4),
        "Shield" => Some(6),
        "Libram" => Some(7),
        "Idol" => Some(8),
        "Totem" => Some(9),
        _ => None,
    };
    if let Some(subclass) = armor {
        return (4, subclass);
    }

    let weapon = match type_name {
        "Axe" => Some(0),
        "Two-Handed Axe" => Some(1),
        "Bow" => Some(2),
        "Gun" => Some(3),
        "Mace" => Some(4),
        "Two-Handed Mace" => Some(5),
        "Polearm" => Some(6),
        "Sword" => Some(7),
        "Two-Handed Sword" => Some(8),
        "Staff" => Some(10),
        "Fist Weapon" => Some(13),
        "Dagger" => Some(15),
        "Thrown" => Some(16),
        "Crossbow" => Some(18),
        "Wand" => Some(19),
        "Fishing Pole" => Some(20),
        _ => None,
    };
    weapon.map_or((0, 0), |subclass| (2, subclass))
}

fn damage_school(label: &str) -> i64 {
    match label.trim() {
        "Holy" => 1,
        "Fire" => 2,
        "Nature" => 3,
        "Frost" => 4,
        "Shadow" => 5,
        "Arcane" => 6,
        _ => 0,
    }
}

fn floor_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Fill the five item spell slots from Use/Equip/Chance-on-hit links that
/// precede the set section. Returns the link text per spell id.
fn parse_item_spells(content: &str, item: &mut ItemTemplate) -> HashMap<i64, String> {
    let set_start = ITEMSET_RE.find(content).map(|m| m.start());
    let mut descriptions = HashMap::new();
    let mut count = 0;

    for caps in SPELL_LINK_RE.captures_iter(content) {
        if count >= item.spells.len() {
            break;
        }
        let Some(link) = caps.get(0) else { continue };
        if set_start.is_some_and(|start| link.start() > start) {
            continue;
        }
        let spell_id = int(caps.get(1));
        if spell_id <= 0 {
            continue;
        }

        let from = floor_boundary(content, link.start().saturating_sub(SPELL_LOOKBACK));
        let context = &content[from..link.start()];
        if context.contains(") Set:") || context.contains("Set Bonus:") {
            continue;
        }
        let is_use = context.contains("Use:") || context.contains(">Use<");
        let is_proc = context.contains("Chance on hit:");
        if !is_use && !is_proc && !context.contains("Equip:") {
            continue;
        }
        let trigger = if is_use {
            0
        } else if is_proc {
            2
        } else {
            1
        };

        let text = resolve_plurals(caps[2].trim());
        if !text.is_empty() {
            descriptions.insert(spell_id, text);
        }
        item.spells[count] = ItemSpell { spell_id, trigger };
        count += 1;
    }
    descriptions
}

/// Class restriction mask from the `Classes:` tooltip line.
fn parse_class_mask(content: &str) -> Option<i64> {
    let start = content.find("Classes:")?;
    let rest = &content[start..];
    let end = rest
        .find("<br")
        .unwrap_or_else(|| floor_boundary(rest, BONUS_WINDOW));
    let line = &rest[..end];
    Some(
        CLASSES
            .iter()
            .filter(|(name, _)| line.contains(name))
            .fold(0, |mask, (_, bit)| mask | bit),
    )
}

/// Set name, member items and bonus thresholds following the set link.
fn parse_item_set(content: &str, set_id: i64) -> ItemSet {
    let mut set = ItemSet {
        id: set_id,
        ..Default::default()
    };

    let link = format!("?itemset={set_id}");
    if let Ok(re) = Regex::new(&format!(r"\?itemset={set_id}[^>]*>([^<]+)</a>")) {
        if let Some(caps) = re.captures(content) {
            set.name = decode_entities(&caps[1]);
        }
    }

    let Some(start) = content.find(&link) else {
        return set;
    };
    let block = &content[start..];

    let bonus_marks: Vec<_> = SET_BONUS_RE.captures_iter(block).collect();
    let items_block = match bonus_marks.first().and_then(|c| c.get(0)) {
        Some(first) => &block[..first.start()],
        None => &block[..floor_boundary(block, SET_ITEMS_WINDOW)],
    };

    let mut seen = HashSet::new();
    let members = ITEM_LINK_RE
        .captures_iter(items_block)
        .map(|c| int(c.get(1)))
        .filter(|id| *id > 0 && seen.insert(*id));
    for (slot, id) in set.items.iter_mut().zip(members) {
        *slot = id;
    }

    for (i, caps) in bonus_marks.iter().enumerate().take(set.bonuses.len()) {
        let Some(mark) = caps.get(0) else { continue };
        let threshold = int(caps.get(1));

        let mut end = mark.start() + BONUS_WINDOW;
        if let Some(next) = bonus_marks.get(i + 1).and_then(|c| c.get(0)) {
            end = end.min(next.start());
        }
        let end = floor_boundary(block, end);
        let segment = block.get(mark.end()..end).unwrap_or("");
        let spell = int(SPELL_ID_RE.captures(segment).and_then(|c| c.get(1)));

        set.bonuses[i] = (threshold, spell);
    }
    set
}

/// Entity ids from the `data: [...]` array of a named listview block.
fn listview_ids(content: &str, view_id: &str) -> Vec<i64> {
    let Some(start) = content.find(&format!("id: '{view_id}'")) else {
        return Vec::new();
    };
    let rest = &content[start..];
    let Some(data_start) = rest.find("data: [") else {
        return Vec::new();
    };
    let end = match rest.find("});") {
        Some(end) if end >= data_start => end,
        _ => floor_boundary(rest, data_start + 5000),
    };

    let mut seen = HashSet::new();
    LISTVIEW_ID_RE
        .captures_iter(&rest[data_start..end])
        .map(|c| int(c.get(1)))
        .filter(|id| *id > 0 && seen.insert(*id))
        .collect()
}
