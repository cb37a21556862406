use super::{
    Db,
    models::{QuestChainEntry, QuestDetail, QuestRecord},
};
use rusqlite::{OptionalExtension, Result, params};
use std::collections::HashSet;

const RACES: [(i64, &str, Side); 10] = [
    (1, "Human", Side::Alliance),
    (2, "Orc", Side::Horde),
    (4, "Dwarf", Side::Alliance),
    (8, "Night Elf", Side::Alliance),
    (16, "Undead", Side::Horde),
    (32, "Tauren", Side::Horde),
    (64, "Gnome", Side::Alliance),
    (128, "Troll", Side::Horde),
    (256, "Goblin", Side::Horde),
    (512, "High Elf", Side::Alliance),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Alliance,
    Horde,
}

/// Map a race bitmask to (`"Alliance"|"Horde"|"Both"`, race names).
pub fn side_and_races(mask: i64) -> (&'static str, String) {
    if mask == 0 {
        return ("Both", "All".to_string());
    }

    let mut names = Vec::new();
    let mut alliance = false;
    let mut horde = false;
    for (bit, name, side) in RACES {
        if mask & bit != 0 {
            names.push(name);
            match side {
                Side::Alliance => alliance = true,
                Side::Horde => horde = true,
            }
        }
    }

    let side = match (alliance, horde) {
        (true, false) => "Alliance",
        (false, true) => "Horde",
        _ => "Both",
    };
    (side, names.join(", "))
}

/// Race mask for a page's `Side:` value. "Both" and unknown values map to 0.
pub fn side_race_mask(side: &str) -> i64 {
    let side = match side.trim() {
        "Alliance" => Side::Alliance,
        "Horde" => Side::Horde,
        _ => return 0,
    };
    RACES
        .iter()
        .filter(|(_, _, s)| *s == side)
        .map(|(bit, _, _)| bit)
        .sum()
}

impl Db {
    /// Stored quest text and levels, with side/race names from the race mask
    /// and the surrounding chain.
    pub fn quest_detail(&self, quest_id: i64) -> Result<Option<QuestDetail>> {
        let detail = self
            .conn
            .query_row(
                "SELECT entry, Title, IFNULL(Details, ''), IFNULL(Objectives, ''),
                        IFNULL(OfferRewardText, ''), IFNULL(EndText, ''),
                        QuestLevel, MinLevel, ZoneOrSort, RequiredRaces
                 FROM quest_template WHERE entry = ?",
                params![quest_id],
                |row| {
                    Ok(QuestDetail {
                        entry: row.get(0)?,
                        title: row.get(1)?,
                        details: row.get(2)?,
                        objectives: row.get(3)?,
                        offer_reward_text: row.get(4)?,
                        end_text: row.get(5)?,
                        quest_level: row.get(6)?,
                        min_level: row.get(7)?,
                        zone_or_sort: row.get(8)?,
                        required_races: row.get(9)?,
                        ..Default::default()
                    })
                },
            )
            .optional()?;
        let Some(mut detail) = detail else {
            return Ok(None);
        };

        let (side, race_names) = side_and_races(detail.required_races);
        detail.side = side.to_string();
        detail.race_names = race_names;
        detail.chain = self.build_chain(quest_id)?;
        Ok(Some(detail))
    }

    /// Resolve the prerequisite/follow-up chain around `quest_id`.
    ///
    /// Prerequisites come first (earliest first, all at depth 0), then the
    /// quest itself at depth 0, then follow-ups with increasing depth. Branches
    /// found by reverse lookup are emitted depth-first. Returns an empty list
    /// when the quest is not part of any chain.
    pub fn build_chain(&self, quest_id: i64) -> Result<Vec<QuestChainEntry>> {
        let Some((title, prev, next_in_chain)) = self.quest_links(quest_id)? else {
            return Ok(Vec::new());
        };

        let mut visited = HashSet::new();
        visited.insert(quest_id);

        let prev = match prev {
            0 => self.quest_pointing_at(quest_id)?.unwrap_or(0),
            p => p,
        };

        let mut chain = Vec::new();
        self.chain_backwards(prev, &mut visited, &mut chain)?;
        chain.push(QuestChainEntry {
            entry: quest_id,
            title,
            depth: 0,
        });
        self.chain_forwards(quest_id, next_in_chain, 0, &mut visited, &mut chain)?;

        if chain.len() <= 1 {
            return Ok(Vec::new());
        }
        Ok(chain)
    }

    /// (title, abs(PrevQuestId), NextQuestInChain)
    fn quest_links(&self, quest_id: i64) -> Result<Option<(String, i64, i64)>> {
        self.conn
            .query_row(
                "SELECT Title, IFNULL(PrevQuestId, 0), IFNULL(NextQuestInChain, 0)
                 FROM quest_template WHERE entry = ?",
                params![quest_id],
                |row| {
                    let prev: i64 = row.get(1)?;
                    Ok((row.get(0)?, prev.abs(), row.get(2)?))
                },
            )
            .optional()
    }

    fn quest_pointing_at(&self, quest_id: i64) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT entry FROM quest_template WHERE NextQuestInChain = ? ORDER BY entry LIMIT 1",
                params![quest_id],
                |row| row.get(0),
            )
            .optional()
    }

    fn chain_backwards(
        &self,
        quest_id: i64,
        visited: &mut HashSet<i64>,
        out: &mut Vec<QuestChainEntry>,
    ) -> Result<()> {
        if quest_id == 0 || !visited.insert(quest_id) {
            return Ok(());
        }
        let Some((title, prev, _)) = self.quest_links(quest_id)? else {
            return Ok(());
        };
        let prev = match prev {
            0 => self.quest_pointing_at(quest_id)?.unwrap_or(0),
            p => p,
        };

        // Earlier quests first
        self.chain_backwards(prev, visited, out)?;
        out.push(QuestChainEntry {
            entry: quest_id,
            title,
            depth: 0,
        });
        Ok(())
    }

    fn chain_forwards(
        &self,
        quest_id: i64,
        next_in_chain: i64,
        parent_depth: i32,
        visited: &mut HashSet<i64>,
        out: &mut Vec<QuestChainEntry>,
    ) -> Result<()> {
        let depth = parent_depth + 1;

        if next_in_chain > 0 && !visited.contains(&next_in_chain) {
            visited.insert(next_in_chain);
            if let Some((title, _, next_next)) = self.quest_links(next_in_chain)? {
                out.push(QuestChainEntry {
                    entry: next_in_chain,
                    title,
                    depth,
                });
                self.chain_forwards(next_in_chain, next_next, depth, visited, out)?;
            }
            return Ok(());
        }

        // No usable explicit pointer: every quest naming this one as its
        // previous quest (either sign) is a follow-up branch.
        let followers: Vec<(i64, String, i64)> = {
            let mut stmt = self.conn.prepare(
                "SELECT entry, Title, IFNULL(NextQuestInChain, 0) FROM quest_template
                 WHERE PrevQuestId = ? OR PrevQuestId = ? ORDER BY entry",
            )?;
            let rows = stmt.query_map(params![quest_id, -quest_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<Result<_>>()?
        };

        for (entry, title, next_next) in followers {
            if !visited.insert(entry) {
                continue;
            }
            out.push(QuestChainEntry { entry, title, depth });
            self.chain_forwards(entry, next_next, depth, visited, out)?;
        }
        Ok(())
    }

    /// Highest quest entry at or above `floor`, or `floor` itself when none.
    pub fn max_quest_id(&self, floor: i64) -> Result<i64> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(entry) FROM quest_template WHERE entry >= ?",
            params![floor],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(floor))
    }

    pub fn quest_ids(&self, start_from: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT entry FROM quest_template WHERE entry >= ? ORDER BY entry")?;
        let rows = stmt.query_map(params![start_from], |row| row.get(0))?;
        rows.collect()
    }

    /// Insert a scraped quest or merge it into the stored row.
    ///
    /// Scraped numbers only replace stored ones when non-zero and scraped text
    /// only when non-empty; chain pointers and rewards are never touched. The
    /// page's side fills the race mask only when none is stored.
    pub fn upsert_quest(&self, quest: &QuestRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO quest_template
                (entry, Title, QuestLevel, MinLevel, ZoneOrSort, Details, Objectives, OfferRewardText, EndText, RequiredRaces)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(entry) DO UPDATE SET
                RequiredRaces = COALESCE(NULLIF(RequiredRaces, 0), excluded.RequiredRaces),
                Title = COALESCE(NULLIF(excluded.Title, ''), Title),
                QuestLevel = COALESCE(NULLIF(excluded.QuestLevel, 0), QuestLevel),
                MinLevel = COALESCE(NULLIF(excluded.MinLevel, 0), MinLevel),
                ZoneOrSort = COALESCE(NULLIF(excluded.ZoneOrSort, 0), ZoneOrSort),
                Details = COALESCE(NULLIF(excluded.Details, ''), Details),
                Objectives = COALESCE(NULLIF(excluded.Objectives, ''), Objectives),
                OfferRewardText = COALESCE(NULLIF(excluded.OfferRewardText, ''), OfferRewardText),
                EndText = COALESCE(NULLIF(excluded.EndText, ''), EndText)",
            params![
                quest.entry,
                quest.title,
                quest.quest_level,
                quest.min_level,
                quest.zone_or_sort,
                quest.details,
                quest.objectives,
                quest.offer_reward_text,
                quest.end_text,
                side_race_mask(&quest.side),
            ],
        )?;
        Ok(())
    }
}
