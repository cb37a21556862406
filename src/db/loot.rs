use super::{
    Db,
    models::{FlattenedLoot, LootEntry, LootRow, LootTableKind},
};
use rusqlite::{OptionalExtension, Result, params};
use std::collections::HashMap;

/// References nested deeper than this are dropped without error.
pub const MAX_LOOT_DEPTH: u32 = 10;

/// Smallest per-path chance kept visible in flattened output.
pub const MIN_CHANCE: f64 = 0.0001;

/// Accumulator for one flattened item before enrichment.
#[derive(Debug, Clone, Copy)]
struct Accum {
    chance: f64,
    min_count: i64,
    max_count: i64,
}

impl Db {
    /// Read all rows of one loot table, decoding item-vs-reference once here.
    pub fn loot_rows(&self, kind: LootTableKind, table_id: i64) -> Result<Vec<LootRow>> {
        let sql = format!(
            "SELECT item, ChanceOrQuestChance, mincountOrRef, maxcount, groupid
             FROM {} WHERE entry = ? ORDER BY item",
            kind.table_name()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![table_id], |row| {
            let item: i64 = row.get(0)?;
            let chance: f64 = row.get(1)?;
            let min_or_ref: i64 = row.get(2)?;
            let max_count: i64 = row.get(3)?;
            Ok(LootRow {
                source_table: table_id,
                entry: LootEntry::from_columns(item, min_or_ref, max_count),
                chance,
                group_id: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    /// Flatten a creature loot table, following references into the
    /// reference table and summing chances for items reached by several paths.
    ///
    /// Items missing from `item_template` are dropped from the result.
    pub fn resolve_loot(&self, root_table: i64) -> Result<Vec<FlattenedLoot>> {
        let mut acc: HashMap<i64, Accum> = HashMap::new();
        self.collect_loot(LootTableKind::Creature, root_table, 1.0, 0, &mut acc)?;
        self.enrich_loot(acc)
    }

    /// Loot for a creature, via its `loot_id` (or its own entry when unset).
    pub fn creature_loot(&self, creature_entry: i64) -> Result<Vec<FlattenedLoot>> {
        let loot_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT loot_id FROM creature_template WHERE entry = ?",
                params![creature_entry],
                |row| row.get(0),
            )
            .optional()?;

        match loot_id {
            None => Ok(Vec::new()),
            Some(0) => self.resolve_loot(creature_entry),
            Some(id) => self.resolve_loot(id),
        }
    }

    fn collect_loot(
        &self,
        kind: LootTableKind,
        table_id: i64,
        multiplier: f64,
        depth: u32,
        acc: &mut HashMap<i64, Accum>,
    ) -> Result<()> {
        if depth > MAX_LOOT_DEPTH {
            return Ok(());
        }

        for row in self.loot_rows(kind, table_id)? {
            let chance = row.chance.abs() * multiplier;
            match row.entry {
                LootEntry::Reference { table_id } => {
                    self.collect_loot(
                        LootTableKind::Reference,
                        table_id,
                        chance / 100.0,
                        depth + 1,
                        acc,
                    )?;
                }
                LootEntry::Item {
                    item_id,
                    min_count,
                    max_count,
                } => {
                    let chance = chance.max(MIN_CHANCE);
                    acc.entry(item_id)
                        .and_modify(|a| a.chance += chance)
                        .or_insert(Accum {
                            chance,
                            min_count,
                            max_count,
                        });
                }
            }
        }
        Ok(())
    }

    fn enrich_loot(&self, acc: HashMap<i64, Accum>) -> Result<Vec<FlattenedLoot>> {
        let mut stmt = self.conn.prepare(
            "SELECT i.name, i.quality, COALESCE(idi.icon, '')
             FROM item_template i
             LEFT JOIN item_display_info idi ON i.display_id = idi.ID
             WHERE i.entry = ?",
        )?;

        let mut out = Vec::with_capacity(acc.len());
        for (item_id, a) in acc {
            let info: Option<(String, i64, String)> = stmt
                .query_row(params![item_id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .optional()?;
            if let Some((name, quality, icon)) = info {
                out.push(FlattenedLoot {
                    item_id,
                    chance: a.chance,
                    min_count: a.min_count,
                    max_count: a.max_count,
                    name,
                    quality,
                    icon,
                });
            }
        }

        out.sort_by(|a, b| {
            b.chance
                .total_cmp(&a.chance)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        Ok(out)
    }

    /// Link an item to the creatures that drop it, as zero-chance rows.
    pub fn insert_dropped_by(&self, item_id: i64, creatures: &[i64]) -> Result<usize> {
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO creature_loot_template
             (entry, item, ChanceOrQuestChance, groupid, mincountOrRef, maxcount)
             VALUES (?, ?, 0, 0, 1, 1)",
        )?;
        let mut inserted = 0;
        for npc in creatures {
            inserted += stmt.execute(params![npc, item_id])?;
        }
        Ok(inserted)
    }
}
