use super::{Db, models::SpellRecord};
use crate::spelltext::{self, MacroContext, SpellLookup};
use rusqlite::{OptionalExtension, Result, params};
use tracing::debug;

impl Db {
    /// Effect parameters of a stored spell.
    pub fn spell_macro_context(&self, spell_id: i64) -> Result<Option<MacroContext>> {
        self.conn
            .query_row(
                "SELECT
                    effectBasePoints1, effectBasePoints2, effectBasePoints3,
                    effectDieSides1, effectDieSides2, effectDieSides3,
                    effectAmplitude1, effectAmplitude2, effectAmplitude3,
                    effectChainTarget1, effectChainTarget2, effectChainTarget3,
                    effectMiscValue1, effectMiscValue2, effectMiscValue3,
                    effectRadiusIndex1, effectRadiusIndex2, effectRadiusIndex3,
                    procChance, procCharges, durationIndex, rangeIndex,
                    COALESCE(dmgMultiplier1, 0), COALESCE(maxAffectedTargets, 0)
                 FROM spell_template WHERE entry = ?",
                params![spell_id],
                |row| {
                    Ok(MacroContext {
                        base_points: [row.get(0)?, row.get(1)?, row.get(2)?],
                        die_sides: [row.get(3)?, row.get(4)?, row.get(5)?],
                        amplitude: [row.get(6)?, row.get(7)?, row.get(8)?],
                        chain_target: [row.get(9)?, row.get(10)?, row.get(11)?],
                        misc_value: [row.get(12)?, row.get(13)?, row.get(14)?],
                        radius_index: [row.get(15)?, row.get(16)?, row.get(17)?],
                        proc_chance: row.get(18)?,
                        proc_charges: row.get(19)?,
                        duration_index: row.get(20)?,
                        range_id: row.get(21)?,
                        damage_multiplier: row.get(22)?,
                        max_affected_targets: row.get(23)?,
                    })
                },
            )
            .optional()
    }

    fn lookup_i64(&self, sql: &str, key: i64) -> Option<i64> {
        match self
            .conn
            .query_row(sql, params![key], |row| row.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => {
                debug!("Spell lookup failed ({sql}): {e}");
                None
            }
        }
    }

    /// Stored description (or the name when the description is empty),
    /// with every macro placeholder expanded. Empty for unknown spells.
    pub fn spell_text(&self, spell_id: i64) -> Result<String> {
        let stored: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT COALESCE(name, ''), COALESCE(description, '') FROM spell_template WHERE entry = ?",
                params![spell_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((name, description)) = stored else {
            return Ok(String::new());
        };
        let template = if description.is_empty() { name } else { description };
        if template.is_empty() {
            return Ok(String::new());
        }

        let ctx = self.spell_macro_context(spell_id)?.unwrap_or_default();
        Ok(spelltext::expand(&template, &ctx, self))
    }

    /// Tooltip line for an item spell, e.g. `"Equip: Increases ..."`.
    pub fn spell_effect_text(&self, spell_id: i64, trigger: i64) -> Result<String> {
        let text = self.spell_text(spell_id)?;
        if text.is_empty() {
            return Ok(text);
        }
        Ok(format!("{} {}", spelltext::trigger_prefix(trigger), text))
    }

    pub fn spell_exists(&self, spell_id: i64) -> Result<bool> {
        self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM spell_template WHERE entry = ?)",
            params![spell_id],
            |row| row.get(0),
        )
    }

    /// Insert a spell, or refresh it only when its stored description is
    /// missing or too short to be real text. Returns true when a row changed.
    pub fn upsert_spell_if_incomplete(&self, spell: &SpellRecord) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT INTO spell_template (entry, name, description) VALUES (?1, ?2, ?3)
             ON CONFLICT(entry) DO UPDATE SET
                name = excluded.name,
                description = excluded.description
             WHERE description = '' OR description IS NULL OR length(description) < 5",
            params![spell.entry, spell.name, spell.description],
        )?;
        Ok(changed > 0)
    }

    /// Insert or update a spell; an empty scraped description keeps the stored one.
    pub fn upsert_spell(&self, spell: &SpellRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO spell_template (entry, name, description) VALUES (?1, ?2, ?3)
             ON CONFLICT(entry) DO UPDATE SET
                name = excluded.name,
                description = COALESCE(NULLIF(excluded.description, ''), description)",
            params![spell.entry, spell.name, spell.description],
        )?;
        Ok(())
    }

    /// Distinct spell ids referenced by the first three item spell slots.
    pub fn referenced_spell_ids(&self, start_from: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT id FROM (
                SELECT spellid_1 AS id FROM item_template WHERE spellid_1 > 0
                UNION SELECT spellid_2 FROM item_template WHERE spellid_2 > 0
                UNION SELECT spellid_3 FROM item_template WHERE spellid_3 > 0
             ) WHERE id >= ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![start_from], |row| row.get(0))?;
        rows.collect()
    }
}

impl SpellLookup for Db {
    fn duration_base(&self, duration_index: i64) -> Option<i64> {
        self.lookup_i64(
            "SELECT duration_base FROM spell_durations WHERE id = ?",
            duration_index,
        )
    }

    fn radius(&self, radius_index: i64) -> Option<i64> {
        self.lookup_i64("SELECT radiusBase FROM spell_radius WHERE id = ?", radius_index)
    }

    fn range_max(&self, range_id: i64) -> Option<i64> {
        self.lookup_i64("SELECT rangeMax FROM spell_range WHERE id = ?", range_id)
    }

    fn macro_context(&self, spell_id: i64) -> Option<MacroContext> {
        match self.spell_macro_context(spell_id) {
            Ok(ctx) => ctx,
            Err(e) => {
                debug!("Spell {spell_id} lookup failed: {e}");
                None
            }
        }
    }
}
