//! Game content store backed by SQLite
use rusqlite::{Connection, Result};
use std::path::Path;
use tracing::info;

pub mod atlas;
pub mod items;
pub mod loot;
pub mod models;
pub mod quests;
pub mod spells;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS item_template (
    entry INTEGER PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    quality INTEGER NOT NULL DEFAULT 0,
    item_level INTEGER NOT NULL DEFAULT 0,
    required_level INTEGER NOT NULL DEFAULT 0,
    class INTEGER NOT NULL DEFAULT 0,
    subclass INTEGER NOT NULL DEFAULT 0,
    inventory_type INTEGER NOT NULL DEFAULT 0,
    display_id INTEGER NOT NULL DEFAULT 0,
    armor INTEGER NOT NULL DEFAULT 0,
    bonding INTEGER NOT NULL DEFAULT 0,
    max_durability INTEGER NOT NULL DEFAULT 0,
    max_count INTEGER NOT NULL DEFAULT 0,
    description TEXT NOT NULL DEFAULT '',
    sell_price INTEGER NOT NULL DEFAULT 0,
    buy_price INTEGER NOT NULL DEFAULT 0,
    stat_type1 INTEGER NOT NULL DEFAULT 0, stat_value1 INTEGER NOT NULL DEFAULT 0,
    stat_type2 INTEGER NOT NULL DEFAULT 0, stat_value2 INTEGER NOT NULL DEFAULT 0,
    stat_type3 INTEGER NOT NULL DEFAULT 0, stat_value3 INTEGER NOT NULL DEFAULT 0,
    stat_type4 INTEGER NOT NULL DEFAULT 0, stat_value4 INTEGER NOT NULL DEFAULT 0,
    stat_type5 INTEGER NOT NULL DEFAULT 0, stat_value5 INTEGER NOT NULL DEFAULT 0,
    stat_type6 INTEGER NOT NULL DEFAULT 0, stat_value6 INTEGER NOT NULL DEFAULT 0,
    stat_type7 INTEGER NOT NULL DEFAULT 0, stat_value7 INTEGER NOT NULL DEFAULT 0,
    stat_type8 INTEGER NOT NULL DEFAULT 0, stat_value8 INTEGER NOT NULL DEFAULT 0,
    stat_type9 INTEGER NOT NULL DEFAULT 0, stat_value9 INTEGER NOT NULL DEFAULT 0,
    stat_type10 INTEGER NOT NULL DEFAULT 0, stat_value10 INTEGER NOT NULL DEFAULT 0,
    holy_res INTEGER NOT NULL DEFAULT 0,
    fire_res INTEGER NOT NULL DEFAULT 0,
    nature_res INTEGER NOT NULL DEFAULT 0,
    frost_res INTEGER NOT NULL DEFAULT 0,
    shadow_res INTEGER NOT NULL DEFAULT 0,
    arcane_res INTEGER NOT NULL DEFAULT 0,
    allowable_class INTEGER NOT NULL DEFAULT -1,
    allowable_race INTEGER NOT NULL DEFAULT -1,
    spellid_1 INTEGER NOT NULL DEFAULT 0, spelltrigger_1 INTEGER NOT NULL DEFAULT 0,
    spellid_2 INTEGER NOT NULL DEFAULT 0, spelltrigger_2 INTEGER NOT NULL DEFAULT 0,
    spellid_3 INTEGER NOT NULL DEFAULT 0, spelltrigger_3 INTEGER NOT NULL DEFAULT 0,
    spellid_4 INTEGER NOT NULL DEFAULT 0, spelltrigger_4 INTEGER NOT NULL DEFAULT 0,
    spellid_5 INTEGER NOT NULL DEFAULT 0, spelltrigger_5 INTEGER NOT NULL DEFAULT 0,
    delay INTEGER NOT NULL DEFAULT 0,
    dmg_min1 REAL NOT NULL DEFAULT 0,
    dmg_max1 REAL NOT NULL DEFAULT 0,
    dmg_type1 INTEGER NOT NULL DEFAULT 0,
    set_id INTEGER NOT NULL DEFAULT 0,
    bag_family INTEGER NOT NULL DEFAULT 0,
    food_type INTEGER NOT NULL DEFAULT 0,
    container_slots INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_item_name ON item_template(name);

CREATE TABLE IF NOT EXISTS item_display_info (
    ID INTEGER PRIMARY KEY,
    icon TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS itemsets (
    itemset_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    item1 INTEGER DEFAULT 0, item2 INTEGER DEFAULT 0, item3 INTEGER DEFAULT 0,
    item4 INTEGER DEFAULT 0, item5 INTEGER DEFAULT 0, item6 INTEGER DEFAULT 0,
    item7 INTEGER DEFAULT 0, item8 INTEGER DEFAULT 0, item9 INTEGER DEFAULT 0,
    item10 INTEGER DEFAULT 0,
    bonus1 INTEGER DEFAULT 0, bonus2 INTEGER DEFAULT 0, bonus3 INTEGER DEFAULT 0,
    bonus4 INTEGER DEFAULT 0, bonus5 INTEGER DEFAULT 0, bonus6 INTEGER DEFAULT 0,
    bonus7 INTEGER DEFAULT 0, bonus8 INTEGER DEFAULT 0,
    spell1 INTEGER DEFAULT 0, spell2 INTEGER DEFAULT 0, spell3 INTEGER DEFAULT 0,
    spell4 INTEGER DEFAULT 0, spell5 INTEGER DEFAULT 0, spell6 INTEGER DEFAULT 0,
    spell7 INTEGER DEFAULT 0, spell8 INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS spell_template (
    entry INTEGER PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    description TEXT DEFAULT '',
    effectBasePoints1 INTEGER NOT NULL DEFAULT 0,
    effectBasePoints2 INTEGER NOT NULL DEFAULT 0,
    effectBasePoints3 INTEGER NOT NULL DEFAULT 0,
    effectDieSides1 INTEGER NOT NULL DEFAULT 0,
    effectDieSides2 INTEGER NOT NULL DEFAULT 0,
    effectDieSides3 INTEGER NOT NULL DEFAULT 0,
    effectAmplitude1 INTEGER NOT NULL DEFAULT 0,
    effectAmplitude2 INTEGER NOT NULL DEFAULT 0,
    effectAmplitude3 INTEGER NOT NULL DEFAULT 0,
    effectChainTarget1 INTEGER NOT NULL DEFAULT 0,
    effectChainTarget2 INTEGER NOT NULL DEFAULT 0,
    effectChainTarget3 INTEGER NOT NULL DEFAULT 0,
    effectMiscValue1 INTEGER NOT NULL DEFAULT 0,
    effectMiscValue2 INTEGER NOT NULL DEFAULT 0,
    effectMiscValue3 INTEGER NOT NULL DEFAULT 0,
    effectRadiusIndex1 INTEGER NOT NULL DEFAULT 0,
    effectRadiusIndex2 INTEGER NOT NULL DEFAULT 0,
    effectRadiusIndex3 INTEGER NOT NULL DEFAULT 0,
    procChance INTEGER NOT NULL DEFAULT 0,
    procCharges INTEGER NOT NULL DEFAULT 0,
    durationIndex INTEGER NOT NULL DEFAULT 0,
    rangeIndex INTEGER NOT NULL DEFAULT 0,
    dmgMultiplier1 REAL DEFAULT 0,
    maxAffectedTargets INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS spell_durations (
    id INTEGER PRIMARY KEY,
    duration_base INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS spell_radius (
    id INTEGER PRIMARY KEY,
    radiusBase INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS spell_range (
    id INTEGER PRIMARY KEY,
    rangeMax INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS quest_template (
    entry INTEGER PRIMARY KEY,
    Title TEXT NOT NULL DEFAULT '',
    Details TEXT,
    Objectives TEXT,
    OfferRewardText TEXT,
    EndText TEXT,
    QuestLevel INTEGER NOT NULL DEFAULT 0,
    MinLevel INTEGER NOT NULL DEFAULT 0,
    Type INTEGER NOT NULL DEFAULT 0,
    ZoneOrSort INTEGER NOT NULL DEFAULT 0,
    RequiredRaces INTEGER NOT NULL DEFAULT 0,
    RequiredClasses INTEGER NOT NULL DEFAULT 0,
    RewXP INTEGER NOT NULL DEFAULT 0,
    RewOrReqMoney INTEGER NOT NULL DEFAULT 0,
    PrevQuestId INTEGER DEFAULT 0,
    NextQuestId INTEGER DEFAULT 0,
    ExclusiveGroup INTEGER DEFAULT 0,
    NextQuestInChain INTEGER DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_quest_prev ON quest_template(PrevQuestId);
CREATE INDEX IF NOT EXISTS idx_quest_next_chain ON quest_template(NextQuestInChain);

CREATE TABLE IF NOT EXISTS creature_template (
    entry INTEGER PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    loot_id INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS creature_loot_template (
    entry INTEGER NOT NULL,
    item INTEGER NOT NULL,
    ChanceOrQuestChance REAL NOT NULL DEFAULT 100,
    groupid INTEGER NOT NULL DEFAULT 0,
    mincountOrRef INTEGER NOT NULL DEFAULT 1,
    maxcount INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (entry, item)
);

CREATE TABLE IF NOT EXISTS reference_loot_template (
    entry INTEGER NOT NULL,
    item INTEGER NOT NULL,
    ChanceOrQuestChance REAL NOT NULL DEFAULT 100,
    groupid INTEGER NOT NULL DEFAULT 0,
    mincountOrRef INTEGER NOT NULL DEFAULT 1,
    maxcount INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (entry, item)
);

CREATE TABLE IF NOT EXISTS atlasloot_categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    display_name TEXT NOT NULL,
    sort_order INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS atlasloot_modules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    display_name TEXT NOT NULL,
    sort_order INTEGER DEFAULT 0,
    FOREIGN KEY (category_id) REFERENCES atlasloot_categories(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS atlasloot_tables (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module_id INTEGER NOT NULL,
    table_key TEXT NOT NULL,
    display_name TEXT NOT NULL,
    sort_order INTEGER DEFAULT 0,
    FOREIGN KEY (module_id) REFERENCES atlasloot_modules(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS atlasloot_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    table_id INTEGER NOT NULL,
    item_id INTEGER NOT NULL,
    spell_id INTEGER DEFAULT 0,
    drop_chance TEXT,
    override_name TEXT,
    override_icon TEXT,
    quality INTEGER DEFAULT 0,
    sort_order INTEGER DEFAULT 0,
    FOREIGN KEY (table_id) REFERENCES atlasloot_tables(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_atlasloot_modules_category ON atlasloot_modules(category_id);
CREATE INDEX IF NOT EXISTS idx_atlasloot_tables_module ON atlasloot_tables(module_id);
CREATE INDEX IF NOT EXISTS idx_atlasloot_items_table ON atlasloot_items(table_id);
CREATE INDEX IF NOT EXISTS idx_atlasloot_items_item ON atlasloot_items(item_id);
"#;

/// A wrapper around a SQLite connection initialized with the content schema.
pub struct Db {
    pub(crate) conn: Connection,
}

impl Db {
    /// Open a database connection at the given path and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Initializing database: {}", path.display());

        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;

        info!("Database initialized successfully");

        Ok(Self { conn })
    }

    /// Open an in-memory database connection (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Raw connection access for ad-hoc fixtures and tooling.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_init() {
        let db = Db::open_in_memory().expect("Failed to open in-memory DB");

        let tables: usize = db
            .conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN (
                    'item_template', 'spell_template', 'quest_template',
                    'creature_loot_template', 'reference_loot_template',
                    'atlasloot_categories', 'atlasloot_modules', 'atlasloot_tables', 'atlasloot_items'
                );",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_eq!(tables, 9);
    }

    #[test]
    fn test_db_open_file_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.db");

        {
            let db = Db::open(&path).unwrap();
            db.conn
                .execute("INSERT INTO item_template (entry, name) VALUES (1, 'Stick')", [])
                .unwrap();
        }

        // Schema creation is idempotent and data survives reopen
        let db = Db::open(&path).unwrap();
        let name: String = db
            .conn
            .query_row("SELECT name FROM item_template WHERE entry = 1", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(name, "Stick");
    }
}
