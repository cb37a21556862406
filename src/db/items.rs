use super::{
    Db,
    models::{FieldChange, ItemSet, ItemTemplate, ItemWrite, RESISTANCE_COLUMNS},
};
use rusqlite::{OptionalExtension, Result, params, params_from_iter, types::Value};
use std::collections::HashMap;
use tracing::info;

const STAT_TYPE_COLUMNS: [&str; 10] = [
    "stat_type1", "stat_type2", "stat_type3", "stat_type4", "stat_type5",
    "stat_type6", "stat_type7", "stat_type8", "stat_type9", "stat_type10",
];
const STAT_VALUE_COLUMNS: [&str; 10] = [
    "stat_value1", "stat_value2", "stat_value3", "stat_value4", "stat_value5",
    "stat_value6", "stat_value7", "stat_value8", "stat_value9", "stat_value10",
];
const SPELL_ID_COLUMNS: [&str; 5] = ["spellid_1", "spellid_2", "spellid_3", "spellid_4", "spellid_5"];
const SPELL_TRIGGER_COLUMNS: [&str; 5] = [
    "spelltrigger_1", "spelltrigger_2", "spelltrigger_3", "spelltrigger_4", "spelltrigger_5",
];

/// Diff lines longer than this are shortened with `...`.
const DIFF_TEXT_LIMIT: usize = 50;

/// How a fetched value is merged into a stored column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Merge {
    /// Replace unless the new text is empty.
    Text,
    /// Replace unless the new value is zero.
    NonZero,
    /// Replace only with a positive value.
    Positive,
    /// Replace when positive, or when the stored class is 0 (freshly shelled rows).
    Subclass,
}

struct Column {
    name: &'static str,
    value: Value,
    merge: Merge,
}

fn col(name: &'static str, value: impl Into<Value>, merge: Merge) -> Column {
    Column {
        name,
        value: value.into(),
        merge,
    }
}

impl ItemTemplate {
    /// Every stored column except `entry`, in table order.
    fn columns(&self) -> Vec<Column> {
        use Merge::*;

        let mut cols = vec![
            col("name", self.name.clone(), Text),
            col("quality", self.quality, NonZero),
            col("item_level", self.item_level, NonZero),
            col("required_level", self.required_level, Positive),
            col("class", self.class, NonZero),
            col("subclass", self.subclass, Subclass),
            col("inventory_type", self.inventory_type, NonZero),
            col("display_id", self.display_id, NonZero),
            col("armor", self.armor, Positive),
            col("bonding", self.bonding, Positive),
            col("max_durability", self.max_durability, Positive),
            col("max_count", self.max_count, Positive),
            col("description", self.description.clone(), Text),
            col("sell_price", self.sell_price, Positive),
        ];
        for (i, stat) in self.stats.iter().enumerate() {
            cols.push(col(STAT_TYPE_COLUMNS[i], stat.stat_type, Positive));
            cols.push(col(STAT_VALUE_COLUMNS[i], stat.value, NonZero));
        }
        for (name, value) in RESISTANCE_COLUMNS.iter().zip(self.resistances) {
            cols.push(col(*name, value, Positive));
        }
        cols.push(col("allowable_class", self.allowable_class, NonZero));
        cols.push(col("allowable_race", self.allowable_race, NonZero));
        for (i, spell) in self.spells.iter().enumerate() {
            cols.push(col(SPELL_ID_COLUMNS[i], spell.spell_id, Positive));
            cols.push(col(SPELL_TRIGGER_COLUMNS[i], spell.trigger, Positive));
        }
        cols.extend([
            col("delay", self.delay, Positive),
            col("dmg_min1", self.dmg_min, Positive),
            col("dmg_max1", self.dmg_max, Positive),
            col("dmg_type1", self.dmg_type, Positive),
            col("set_id", self.set_id, Positive),
            col("bag_family", self.bag_family, Positive),
            col("food_type", self.food_type, Positive),
            col("container_slots", self.container_slots, Positive),
        ]);
        cols
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

fn shorten(text: &str) -> String {
    if text.chars().count() > DIFF_TEXT_LIMIT {
        let head: String = text.chars().take(DIFF_TEXT_LIMIT).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// Log a field-by-field diff for one item, or a distinct line when nothing changed.
pub fn log_item_diff(entry: i64, name: &str, changes: &[FieldChange]) {
    if changes.is_empty() {
        info!("item {entry} \"{name}\" - no changes");
        return;
    }

    info!("diff item_template (entry={entry}) \"{name}\":");
    for change in changes {
        info!("  - {}: {}", change.field, shorten(&change.old));
        info!("  + {}: {}", change.field, shorten(&change.new));
    }
}

impl Db {
    pub fn item_exists(&self, entry: i64) -> Result<bool> {
        self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM item_template WHERE entry = ?)",
            params![entry],
            |row| row.get(0),
        )
    }

    pub fn item_name(&self, entry: i64) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT name FROM item_template WHERE entry = ?",
                params![entry],
                |row| row.get(0),
            )
            .optional()
    }

    /// Highest stored item entry, 0 for an empty table.
    pub fn max_item_id(&self) -> Result<i64> {
        let max: Option<i64> =
            self.conn
                .query_row("SELECT MAX(entry) FROM item_template", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0))
    }

    pub fn item_ids(&self, start_from: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT entry FROM item_template WHERE entry >= ? ORDER BY entry")?;
        let rows = stmt.query_map(params![start_from], |row| row.get(0))?;
        rows.collect()
    }

    /// Lowercased item name → entry (lowest entry wins for duplicate names).
    pub fn item_name_map(&self) -> Result<HashMap<String, i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT entry, name FROM item_template WHERE name != '' ORDER BY entry")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let (entry, name) = row?;
            map.entry(name.to_lowercase()).or_insert(entry);
        }
        Ok(map)
    }

    fn insert_item_with(&self, verb: &str, item: &ItemTemplate) -> Result<usize> {
        let cols = item.columns();
        let names: Vec<&str> = cols.iter().map(|c| c.name).collect();
        let placeholders = vec!["?"; cols.len() + 1].join(", ");
        let sql = format!(
            "{verb} INTO item_template (entry, {}) VALUES ({placeholders})",
            names.join(", ")
        );

        let values = std::iter::once(Value::Integer(item.entry)).chain(cols.into_iter().map(|c| c.value));
        self.conn.execute(&sql, params_from_iter(values))
    }

    pub fn insert_item(&self, item: &ItemTemplate) -> Result<()> {
        self.insert_item_with("INSERT", item)?;
        Ok(())
    }

    /// Insert unless the entry already exists. Returns true when inserted.
    pub fn insert_item_ignore(&self, item: &ItemTemplate) -> Result<bool> {
        Ok(self.insert_item_with("INSERT OR IGNORE", item)? > 0)
    }

    /// Current stored values for every tracked column of an item.
    fn item_snapshot(&self, entry: i64, names: &[&'static str]) -> Result<Option<Vec<Value>>> {
        let sql = format!(
            "SELECT {} FROM item_template WHERE entry = ?",
            names.join(", ")
        );
        self.conn
            .query_row(&sql, params![entry], |row| {
                (0..names.len()).map(|i| row.get::<_, Value>(i)).collect()
            })
            .optional()
    }

    /// Merge fetched values into an existing row without erasing known data,
    /// returning the columns whose stored value changed.
    pub fn merge_update_item(&self, item: &ItemTemplate) -> Result<Vec<FieldChange>> {
        let cols = item.columns();
        let names: Vec<&'static str> = cols.iter().map(|c| c.name).collect();
        let before = self.item_snapshot(item.entry, &names)?;

        let mut sets = Vec::with_capacity(cols.len());
        let mut values = Vec::with_capacity(cols.len() * 2 + 1);
        for c in cols {
            let name = c.name;
            match c.merge {
                Merge::Text => {
                    sets.push(format!("{name} = COALESCE(NULLIF(?, ''), {name})"));
                    values.push(c.value);
                }
                Merge::NonZero => {
                    sets.push(format!("{name} = CASE WHEN ? != 0 THEN ? ELSE {name} END"));
                    values.push(c.value.clone());
                    values.push(c.value);
                }
                Merge::Positive => {
                    sets.push(format!("{name} = CASE WHEN ? > 0 THEN ? ELSE {name} END"));
                    values.push(c.value.clone());
                    values.push(c.value);
                }
                Merge::Subclass => {
                    sets.push(format!(
                        "{name} = CASE WHEN ? > 0 OR class = 0 THEN ? ELSE {name} END"
                    ));
                    values.push(c.value.clone());
                    values.push(c.value);
                }
            }
        }
        values.push(Value::Integer(item.entry));

        let sql = format!("UPDATE item_template SET {} WHERE entry = ?", sets.join(", "));
        self.conn.execute(&sql, params_from_iter(values))?;

        let after = self.item_snapshot(item.entry, &names)?;
        let (Some(before), Some(after)) = (before, after) else {
            return Ok(Vec::new());
        };

        Ok(names
            .iter()
            .zip(before.iter().zip(after.iter()))
            .filter(|(_, (old, new))| old != new)
            .map(|(field, (old, new))| FieldChange {
                field: field.to_string(),
                old: value_text(old),
                new: value_text(new),
            })
            .collect())
    }

    /// Insert a new item, or merge into the stored one and log what changed.
    pub fn write_item(&self, item: &ItemTemplate) -> Result<ItemWrite> {
        if self.item_exists(item.entry)? {
            let changes = self.merge_update_item(item)?;
            log_item_diff(item.entry, &item.name, &changes);
            Ok(ItemWrite::Updated(changes))
        } else {
            info!("+ NEW ITEM {}: {}", item.entry, item.name);
            self.insert_item(item)?;
            Ok(ItemWrite::Inserted)
        }
    }

    pub fn upsert_item_set(&self, set: &ItemSet) -> Result<()> {
        let mut values: Vec<Value> = vec![Value::Integer(set.id), Value::Text(set.name.clone())];
        values.extend(set.items.iter().map(|i| Value::Integer(*i)));
        values.extend(set.bonuses.iter().map(|(threshold, _)| Value::Integer(*threshold)));
        values.extend(set.bonuses.iter().map(|(_, spell)| Value::Integer(*spell)));

        self.conn.execute(
            "INSERT OR REPLACE INTO itemsets (itemset_id, name,
                item1, item2, item3, item4, item5, item6, item7, item8, item9, item10,
                bonus1, bonus2, bonus3, bonus4, bonus5, bonus6, bonus7, bonus8,
                spell1, spell2, spell3, spell4, spell5, spell6, spell7, spell8)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params_from_iter(values),
        )?;
        Ok(())
    }
}
