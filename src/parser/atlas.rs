//! AtlasLoot addon data: loot tables, table display names, special menus and
//! the category → module → table → item hierarchy from the core menu file.
//!
//! Everything here works on text already read into memory.
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::{debug, warn};

static TABLE_START_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*(\w+)\s*=\s*\{").unwrap());
static SHORT_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{\s*(\d+)\s*,\s*"([^"]*%)"\s*\}"#).unwrap());
static DETAILED_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\s*"?([se]?\d+)"?\s*,\s*"([^"]*)"\s*,\s*"([^"]*)""#).unwrap()
});
static SIMPLE_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\s*(\d+)\s*,").unwrap());

static REGISTER_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"\["(\w+)"\]\s*="#).unwrap());
static AL_STRING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"AL\["([^"]+)"\]"#).unwrap());
static FIRST_QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"\{\s*"([^"]+)""#).unwrap());

static MENU_LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)AtlasLoot_MenuList\s*=\s*\{(.*?)\}").unwrap());
static MENU_LIST_ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\["([^"]+)"\]\s*=\s*"([^"]+)""#).unwrap());
static NEXT_FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^function\s+").unwrap());
static SET_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":SetText\((.*)\)").unwrap());
static LOOT_PAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\.lootpage\s*=\s*"([^"]+)""#).unwrap());
static QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]+)""#).unwrap());

static CATEGORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{\[AL\["(.*?)"\]\]\s*=\s*\{"#).unwrap());
static NESTED_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{\[\s*AL\["(.*?)"\]\]\s*=\s*\{"#).unwrap());
static MENU_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{+\s*AL\["(.*?)"\],\s*"(.*?)",\s*"(.*?)"\s*\}+,?"#).unwrap()
});
static SUBTABLE_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\["(.*?)"\]\s*=\s*\{"#).unwrap());
static SUBTABLE_ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{\s*AL\["(.*?)"\],\s*"(.*?)"\s*\},"#).unwrap());

const MAIN_MENU_ANCHOR: &str = "AtlasLoot_HewdropDown = {";
const SUBTABLES_ANCHOR: &str = "AtlasLoot_HewdropDown_SubTables = {";
const SPLIT_CATEGORY: &str = "Dungeons & Raids";
const REGISTER_SKIPPED: [&str; 4] = ["Rare", "Summon", "Quest", "Enchants"];

/// One row of a loot table file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LootTableItem {
    pub item_id: i64,
    pub spell_id: i64,
    pub drop_chance: String,
    pub name: String,
    pub icon: String,
    pub quality: i64,
}

/// One page of a special (function-built) menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuEntry {
    pub table_key: String,
    pub name: String,
}

/// Pre-parsed lookups the hierarchy walk resolves children against.
#[derive(Debug, Clone, Default)]
pub struct HierarchySources {
    pub loot_tables: HashMap<String, Vec<LootTableItem>>,
    pub special_menus: HashMap<String, Vec<MenuEntry>>,
    pub display_names: HashMap<String, String>,
    /// Lowercased item name → item id, for spell and name-only rows.
    pub item_names: HashMap<String, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedHierarchy {
    pub categories: Vec<ParsedCategory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedCategory {
    pub key: String,
    pub display_name: String,
    pub sort_order: i64,
    pub modules: Vec<ParsedModule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedModule {
    pub key: String,
    pub display_name: String,
    pub tables: Vec<ParsedTable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedTable {
    pub key: String,
    pub display_name: String,
    pub sort_order: i64,
    pub items: Vec<AtlasItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AtlasItem {
    pub item_id: i64,
    pub spell_id: i64,
    pub drop_chance: String,
    pub override_name: String,
    pub override_icon: String,
    pub quality: i64,
    pub sort_order: i64,
}

impl ParsedHierarchy {
    pub fn module_count(&self) -> usize {
        self.categories.iter().map(|c| c.modules.len()).sum()
    }

    pub fn table_count(&self) -> usize {
        self.categories
            .iter()
            .flat_map(|c| &c.modules)
            .map(|m| m.tables.len())
            .sum()
    }

    pub fn item_count(&self) -> usize {
        self.categories
            .iter()
            .flat_map(|c| &c.modules)
            .flat_map(|m| &m.tables)
            .map(|t| t.items.len())
            .sum()
    }
}

// ── Loot table files ─────────────────────────────────────────────────

fn parse_loot_row(line: &str) -> Option<LootTableItem> {
    let mut item = LootTableItem::default();

    if let Some(caps) = DETAILED_ITEM_RE.captures(line) {
        let raw_id = &caps[1];
        item.icon = caps[2].to_string();
        let raw_name = &caps[3];

        match raw_id.strip_prefix('s').or_else(|| raw_id.strip_prefix('e')) {
            Some(spell) => item.spell_id = spell.parse().unwrap_or(0),
            None => item.item_id = raw_id.parse().unwrap_or(0),
        }

        // "=q4=Name" carries the quality digit
        match raw_name.strip_prefix("=q") {
            Some(rest) => {
                item.quality = rest.get(..1).and_then(|q| q.parse().ok()).unwrap_or(0);
                item.name = rest.get(2..).unwrap_or_default().to_string();
            }
            None => item.name = raw_name.to_string(),
        }
    } else if let Some(caps) = SHORT_ITEM_RE.captures(line) {
        item.item_id = caps[1].parse().unwrap_or(0);
        item.drop_chance = caps[2].to_string();
    } else if let Some(caps) = SIMPLE_ITEM_RE.captures(line) {
        item.item_id = caps[1].parse().unwrap_or(0);
    }

    (item.item_id > 0 || item.spell_id > 0).then_some(item)
}

/// Table key → rows for one `Database/*.lua` file.
///
/// Tables are line-delimited: `Key = {` opens one, a line containing `};`
/// closes it. Tables without any recognisable row are dropped.
pub fn parse_loot_tables(text: &str) -> HashMap<String, Vec<LootTableItem>> {
    let mut tables = HashMap::new();
    let mut current: Option<(String, Vec<LootTableItem>)> = None;

    for line in text.lines() {
        if let Some(caps) = TABLE_START_RE.captures(line) {
            if let Some((key, items)) = current.take() {
                if !items.is_empty() {
                    tables.insert(key, items);
                }
            }
            current = Some((caps[1].to_string(), Vec::new()));
            continue;
        }

        let Some((_, items)) = current.as_mut() else {
            continue;
        };

        if line.contains('{') {
            if let Some(item) = parse_loot_row(line) {
                items.push(item);
            }
        }

        if line.contains("};") {
            if let Some((key, items)) = current.take() {
                if !items.is_empty() {
                    tables.insert(key, items);
                }
            }
        }
    }

    if let Some((key, items)) = current {
        if !items.is_empty() {
            tables.insert(key, items);
        }
    }
    tables
}

// ── TableRegister ────────────────────────────────────────────────────

/// Table key → display name from `TableRegister.lua`.
pub fn parse_table_register(text: &str) -> HashMap<String, String> {
    let mut names = HashMap::new();
    let mut current_key: Option<String> = None;
    let mut buffer: Vec<String> = Vec::new();

    for line in text.lines() {
        if let Some(caps) = REGISTER_KEY_RE.captures(line) {
            current_key = Some(caps[1].to_string());
            buffer = vec![line.trim().to_string()];
        } else if current_key.is_some() {
            buffer.push(line.trim().to_string());
        }
        let Some(key) = current_key.as_ref() else {
            continue;
        };

        let combined = buffer.join(" ");
        if !(combined.contains("AtlasLoot") && combined.contains("Items")) {
            continue;
        }

        let al: Vec<&str> = AL_STRING_RE
            .captures_iter(&combined)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if !al.is_empty() {
            let parts: Vec<&str> = al
                .into_iter()
                .filter(|s| !REGISTER_SKIPPED.contains(s))
                .collect();
            if !parts.is_empty() {
                names.insert(key.clone(), parts.join(" - "));
            }
        } else if let Some(caps) = FIRST_QUOTED_RE.captures(&combined) {
            names.insert(key.clone(), caps[1].to_string());
        }

        current_key = None;
        buffer.clear();
    }
    names
}

// ── Special menus ────────────────────────────────────────────────────

fn function_body<'a>(source: &'a str, function: &str) -> Option<&'a str> {
    let start_re = Regex::new(&format!(r"(?m)^function\s+{}\s*\(", regex::escape(function))).ok()?;
    let start = start_re.find(source)?;
    let rest = &source[start.end()..];
    let end = NEXT_FUNCTION_RE
        .find(rest)
        .map_or(source.len(), |m| start.end() + m.start());
    Some(&source[start.start()..end])
}

fn menu_entries(body: &str) -> Vec<MenuEntry> {
    let mut entries = Vec::new();
    let mut pending_name: Option<String> = None;

    for line in body.lines() {
        if let Some(caps) = SET_TEXT_RE.captures(line) {
            let raw = &caps[1];
            let mut parts: Vec<&str> = AL_STRING_RE
                .captures_iter(raw)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect();
            if parts.is_empty() {
                // Literal strings, minus colour escapes
                parts = QUOTED_RE
                    .captures_iter(raw)
                    .filter_map(|c| c.get(1).map(|m| m.as_str()))
                    .filter(|s| !s.starts_with("|c"))
                    .collect();
            }
            if !parts.is_empty() {
                pending_name = Some(parts.join(" "));
            }
        }

        if let Some(caps) = LOOT_PAGE_RE.captures(line) {
            let table_key = caps[1].to_string();
            let name = pending_name.take().unwrap_or_else(|| table_key.clone());
            entries.push(MenuEntry { table_key, name });
        }
    }
    entries
}

/// Menu key → ordered pages, for menus that are built by Lua functions.
///
/// `core_text` supplies the `AtlasLoot_MenuList` key → function table;
/// `function_sources` are searched in order for the function bodies, a later
/// source overriding an earlier one.
pub fn parse_special_menus(
    core_text: &str,
    function_sources: &[String],
) -> HashMap<String, Vec<MenuEntry>> {
    let mut menus = HashMap::new();
    let Some(list) = MENU_LIST_RE.captures(core_text) else {
        return menus;
    };

    let functions: Vec<(String, String)> = list[1]
        .lines()
        .filter_map(|line| MENU_LIST_ENTRY_RE.captures(line))
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect();

    for source in function_sources {
        for (menu_key, function) in &functions {
            let Some(body) = function_body(source, function) else {
                continue;
            };
            let entries = menu_entries(body);
            if !entries.is_empty() {
                menus.insert(menu_key.clone(), entries);
            }
        }
    }
    menus
}

// ── Hierarchy ────────────────────────────────────────────────────────

/// Index of the `}` closing a block whose opening `{` ends just before `from`.
fn matching_brace(text: &str, from: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (i, b) in text.bytes().enumerate().skip(from) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Static submenus: submenu key → ordered (display name, table key).
fn parse_subtables(core_text: &str) -> HashMap<String, Vec<(String, String)>> {
    let mut subtables = HashMap::new();
    let Some(pos) = core_text.find(SUBTABLES_ANCHOR) else {
        return subtables;
    };
    let block = &core_text[pos + SUBTABLES_ANCHOR.len()..];

    let starts: Vec<(String, usize, usize)> = SUBTABLE_START_RE
        .captures_iter(block)
        .filter_map(|c| {
            let whole = c.get(0)?;
            Some((c[1].to_string(), whole.start(), whole.end()))
        })
        .collect();

    for (i, (key, _, body_start)) in starts.iter().enumerate() {
        let body_end = starts.get(i + 1).map_or(block.len(), |next| next.1);
        let entries = SUBTABLE_ENTRY_RE
            .captures_iter(&block[*body_start..body_end])
            .map(|c| (c[1].to_string(), c[2].to_string()))
            .collect();
        subtables.insert(key.clone(), entries);
    }
    subtables
}

struct HierarchyWalk<'a> {
    sources: &'a HierarchySources,
    subtables: HashMap<String, Vec<(String, String)>>,
}

impl HierarchyWalk<'_> {
    fn table(&self, key: &str, display_name: String, sort_order: i64) -> ParsedTable {
        let mut items = Vec::new();
        if let Some(rows) = self.sources.loot_tables.get(key) {
            let mut seen = HashSet::new();
            for (k, row) in rows.iter().enumerate() {
                let mut item_id = row.item_id;
                if (row.spell_id > 0 || item_id == 0) && !row.name.is_empty() {
                    if let Some(found) = self.sources.item_names.get(&row.name.to_lowercase()) {
                        item_id = *found;
                    }
                }
                if !seen.insert((item_id, row.spell_id)) {
                    continue;
                }
                items.push(AtlasItem {
                    item_id,
                    spell_id: row.spell_id,
                    drop_chance: row.drop_chance.clone(),
                    override_name: row.name.clone(),
                    override_icon: row.icon.clone(),
                    quality: row.quality,
                    sort_order: k as i64,
                });
            }
        } else {
            debug!("Loot table '{key}' not found");
        }

        ParsedTable {
            key: key.to_string(),
            display_name,
            sort_order,
            items,
        }
    }

    /// Tables of one menu entry: special menu, then static submenu, then
    /// the entry itself when it names a table directly.
    fn module_tables(&self, key: &str, name: &str, kind: &str) -> Vec<ParsedTable> {
        if let Some(pages) = self.sources.special_menus.get(key) {
            return pages
                .iter()
                .enumerate()
                .map(|(i, page)| {
                    let display = if page.name.is_empty() || page.name == page.table_key {
                        self.sources
                            .display_names
                            .get(&page.table_key)
                            .cloned()
                            .unwrap_or_else(|| page.name.clone())
                    } else {
                        page.name.clone()
                    };
                    self.table(&page.table_key, display, i as i64)
                })
                .collect();
        }

        match kind {
            "Submenu" => match self.subtables.get(key) {
                Some(entries) => entries
                    .iter()
                    .enumerate()
                    .map(|(i, (display, table_key))| self.table(table_key, display.clone(), i as i64))
                    .collect(),
                None => {
                    warn!("Submenu '{key}' not found in submenus or special menus");
                    Vec::new()
                }
            },
            "Table" => vec![self.table(key, name.to_string(), 0)],
            _ => Vec::new(),
        }
    }

    /// Collect modules from `block` and its nested `{[AL["..."]] = { ... }}` blocks.
    fn modules(&self, block: &str, seen: &mut HashSet<String>, out: &mut Vec<(String, ParsedModule)>) {
        for caps in MENU_ITEM_RE.captures_iter(block) {
            let (name, key, kind) = (&caps[1], &caps[2], &caps[3]);
            if !seen.insert(key.to_string()) {
                continue;
            }

            let mut tables: Vec<ParsedTable> = Vec::new();
            for table in self.module_tables(key, name, kind) {
                if tables.iter().all(|t| t.key != table.key) {
                    tables.push(table);
                }
            }
            out.push((
                name.to_string(),
                ParsedModule {
                    key: key.to_string(),
                    display_name: name.to_string(),
                    tables,
                },
            ));
        }

        for m in NESTED_BLOCK_RE.find_iter(block) {
            if let Some(end) = matching_brace(block, m.end()) {
                self.modules(&block[m.end()..end], seen, out);
            }
        }
    }
}

fn new_category(key: &str, sort_order: i64) -> ParsedCategory {
    ParsedCategory {
        key: key.to_string(),
        display_name: key.to_string(),
        sort_order,
        modules: Vec::new(),
    }
}

/// Recover the category hierarchy from `Core/AtlasLoot.lua`.
///
/// Best effort: an unterminated category block ends the walk, keeping what
/// was already recovered. `Dungeons & Raids` is split into `Dungeons` and
/// `Raids` by the `[RAID]` module prefix.
pub fn parse_hierarchy(core_text: &str, sources: &HierarchySources) -> ParsedHierarchy {
    let mut hierarchy = ParsedHierarchy::default();
    let Some(pos) = core_text.find(MAIN_MENU_ANCHOR) else {
        return hierarchy;
    };
    let menu = &core_text[pos + MAIN_MENU_ANCHOR.len()..];
    let menu = menu.split("};").next().unwrap_or_default();

    let walk = HierarchyWalk {
        sources,
        subtables: parse_subtables(core_text),
    };

    let mut seen_categories = HashSet::new();
    let mut offset = 0;
    while offset < menu.len() {
        let Some(caps) = CATEGORY_RE.captures(&menu[offset..]) else {
            break;
        };
        let Some(whole) = caps.get(0) else { break };
        let name = caps[1].to_string();
        let block_start = offset + whole.end();
        let Some(block_end) = matching_brace(menu, block_start) else {
            break;
        };
        offset = block_end + 1;

        if !seen_categories.insert(name.clone()) {
            continue;
        }

        let mut seen_modules = HashSet::new();
        let mut modules = Vec::new();
        walk.modules(&menu[block_start..block_end], &mut seen_modules, &mut modules);

        if name == SPLIT_CATEGORY {
            let mut dungeons = new_category("Dungeons", 10);
            let mut raids = new_category("Raids", 11);
            for (display, module) in modules {
                if display.starts_with("[RAID]") {
                    raids.modules.push(module);
                } else {
                    dungeons.modules.push(module);
                }
            }
            hierarchy.categories.push(dungeons);
            hierarchy.categories.push(raids);
        } else {
            let mut category = new_category(&name, 99);
            category.modules = modules.into_iter().map(|(_, m)| m).collect();
            hierarchy.categories.push(category);
        }
    }
    hierarchy
}
