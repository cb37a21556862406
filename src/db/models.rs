use serde::Serialize;

// ── Loot ─────────────────────────────────────────────────────────────

/// Which physical table a loot id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LootTableKind {
    Creature,
    Reference,
}

impl LootTableKind {
    pub(crate) fn table_name(self) -> &'static str {
        match self {
            Self::Creature => "creature_loot_template",
            Self::Reference => "reference_loot_template",
        }
    }
}

/// What a loot row yields. The store encodes a reference as a negative
/// `mincountOrRef`; that sign is decoded once, when the row is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LootEntry {
    Item { item_id: i64, min_count: i64, max_count: i64 },
    Reference { table_id: i64 },
}

impl LootEntry {
    pub fn from_columns(item: i64, min_count_or_ref: i64, max_count: i64) -> Self {
        if min_count_or_ref < 0 {
            Self::Reference {
                table_id: -min_count_or_ref,
            }
        } else {
            Self::Item {
                item_id: item,
                min_count: min_count_or_ref,
                max_count,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LootRow {
    pub source_table: i64,
    pub entry: LootEntry,
    pub chance: f64,
    pub group_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlattenedLoot {
    pub item_id: i64,
    pub chance: f64,
    pub min_count: i64,
    pub max_count: i64,
    pub name: String,
    pub quality: i64,
    pub icon: String,
}

// ── Quests ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestChainEntry {
    pub entry: i64,
    pub title: String,
    pub depth: i32,
}

/// A stored quest with its faction side, race names and chain resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuestDetail {
    pub entry: i64,
    pub title: String,
    pub details: String,
    pub objectives: String,
    pub offer_reward_text: String,
    pub end_text: String,
    pub quest_level: i64,
    pub min_level: i64,
    pub zone_or_sort: i64,
    pub required_races: i64,
    pub side: String,
    pub race_names: String,
    pub chain: Vec<QuestChainEntry>,
}

/// Quest fields recovered from a remote quest page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuestRecord {
    pub entry: i64,
    pub title: String,
    pub quest_level: i64,
    pub min_level: i64,
    pub zone_or_sort: i64,
    pub side: String,
    pub details: String,
    pub objectives: String,
    pub offer_reward_text: String,
    pub end_text: String,
}

// ── Items ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ItemStat {
    pub stat_type: i64,
    pub value: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ItemSpell {
    pub spell_id: i64,
    pub trigger: i64,
}

/// Resistances in school order: holy, fire, nature, frost, shadow, arcane.
pub const RESISTANCE_COLUMNS: [&str; 6] = [
    "holy_res",
    "fire_res",
    "nature_res",
    "frost_res",
    "shadow_res",
    "arcane_res",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemTemplate {
    pub entry: i64,
    pub name: String,
    pub quality: i64,
    pub item_level: i64,
    pub required_level: i64,
    pub class: i64,
    pub subclass: i64,
    pub inventory_type: i64,
    pub display_id: i64,
    pub armor: i64,
    pub bonding: i64,
    pub max_durability: i64,
    pub max_count: i64,
    pub description: String,
    pub sell_price: i64,
    pub stats: [ItemStat; 10],
    pub resistances: [i64; 6],
    pub allowable_class: i64,
    pub allowable_race: i64,
    pub spells: [ItemSpell; 5],
    pub delay: i64,
    pub dmg_min: f64,
    pub dmg_max: f64,
    pub dmg_type: i64,
    pub set_id: i64,
    pub bag_family: i64,
    pub food_type: i64,
    pub container_slots: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ItemSet {
    pub id: i64,
    pub name: String,
    pub items: [i64; 10],
    /// (piece threshold, bonus spell)
    pub bonuses: [(i64, i64); 8],
}

impl ItemSet {
    pub fn bonus_spells(&self) -> impl Iterator<Item = i64> + '_ {
        self.bonuses.iter().map(|(_, s)| *s).filter(|s| *s > 0)
    }
}

/// One changed column in an update diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old: String,
    pub new: String,
}

/// Outcome of writing a fetched item into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemWrite {
    Inserted,
    Updated(Vec<FieldChange>),
}

// ── Spells ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpellRecord {
    pub entry: i64,
    pub name: String,
    pub description: String,
}

// ── AtlasLoot ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingItem {
    pub item_id: i64,
    pub table_key: String,
    pub table_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub categories: usize,
    pub modules: usize,
    pub tables: usize,
    pub items: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loot_entry_sign_decoding() {
        assert_eq!(
            LootEntry::from_columns(0, -42, 1),
            LootEntry::Reference { table_id: 42 }
        );
        assert_eq!(
            LootEntry::from_columns(7, 2, 5),
            LootEntry::Item {
                item_id: 7,
                min_count: 2,
                max_count: 5
            }
        );
        // Zero is a (degenerate) item count, not a reference
        assert!(matches!(
            LootEntry::from_columns(7, 0, 0),
            LootEntry::Item { .. }
        ));
    }

    #[test]
    fn test_item_set_bonus_spells() {
        let mut set = ItemSet::default();
        set.bonuses[0] = (2, 100);
        set.bonuses[1] = (4, 0);
        set.bonuses[2] = (6, 300);
        assert_eq!(set.bonus_spells().collect::<Vec<_>>(), vec![100, 300]);
    }
}
