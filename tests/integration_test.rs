/// End-to-end tests for the lootsync pipeline.
///
/// Tests the complete flow:
///   Remote page → Parser → Store → Loot / Quest chain / Spell text
use lootsync::config::SyncConfig;
use lootsync::db::Db;
use lootsync::sync::atlas::import_atlas;
use lootsync::sync::mock::MockSource;
use lootsync::sync::source::EntityKind;
use lootsync::sync::{FullSyncOptions, SyncService};
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const ITEM_PAGE: &str = r#"<html><head><title>Thunderfury - Items - Turtle WoW Database</title></head>
<body>
<b class="q5">Thunderfury</b>
<table><tr><td>One-Hand</td><th>Sword</th></tr></table>
<span>53 - 100 Damage</span> Speed 1.90<br>
<span class="q2">Chance on hit: <a href="?spell=21992">Blasts your enemy with lightning.</a></span><br>
Level: 80 Display ID: 30606
</body></html>
<script>new Listview({template: 'npc', id: 'dropped-by', data: [{id: 12056}]});</script>"#;

const SPELL_PAGE: &str = "<title>Thunderfury - Spells - Turtle WoW Database</title>\
    <table><tr><th>Description</th></tr><tr><td>Blasts your enemy for $s1 Nature damage.</td></tr></table>";

fn quest_page(title: &str) -> String {
    format!(
        "<html><body><h1 class=\"heading-size-1\">{title} - Quests - Turtle WoW Database</h1>\
         <div class=\"infobox\"><ul><li>Level: 60</li></ul></div></body></html>"
    )
}

fn service(source: MockSource) -> SyncService {
    let config = SyncConfig {
        workers: 2,
        quest_delay_ms: 0,
        ..SyncConfig::default()
    };
    SyncService::new(
        Arc::new(Mutex::new(Db::open_in_memory().unwrap())),
        Arc::new(source),
        config,
    )
}

/// Sync an item, then resolve a boss's loot through a reference table and
/// expand the synced proc spell.
#[test]
fn test_item_sync_feeds_loot_and_spell_text() {
    let source = MockSource::new()
        .with_page(EntityKind::Item, 19019, ITEM_PAGE)
        .with_page(EntityKind::Spell, 21992, SPELL_PAGE);
    let svc = service(source);

    let result = svc.sync_item(19019);
    assert!(result.success, "sync failed: {:?}", result.error);
    assert_eq!(result.name, "Thunderfury");

    let db = svc.db().lock().unwrap();
    let (quality, delay, spell, trigger): (i64, i64, i64, i64) = db
        .conn()
        .query_row(
            "SELECT quality, delay, spellid_1, spelltrigger_1 FROM item_template WHERE entry = 19019",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .unwrap();
    assert_eq!((quality, delay, spell, trigger), (5, 1900, 21992, 2));

    // The dropped-by link plus a 50% reference table that drops it 20% of the time
    db.conn()
        .execute_batch(
            "INSERT INTO creature_template (entry, name, loot_id) VALUES (12056, 'Baron Geddon', 0);
             INSERT INTO creature_loot_template (entry, item, ChanceOrQuestChance, mincountOrRef, maxcount)
                 VALUES (12056, 99999, 50, -500, 1);
             INSERT INTO reference_loot_template (entry, item, ChanceOrQuestChance, mincountOrRef, maxcount)
                 VALUES (500, 19019, 20, 1, 1);",
        )
        .unwrap();
    let loot = db.creature_loot(12056).unwrap();
    assert_eq!(loot.len(), 1);
    assert_eq!(loot[0].item_id, 19019);
    assert_eq!(loot[0].name, "Thunderfury");
    assert!((loot[0].chance - 10.0001).abs() < 1e-9, "chance {}", loot[0].chance);

    // Base points are not on the page; fill them in and expand
    db.conn()
        .execute(
            "UPDATE spell_template SET effectBasePoints1 = 299 WHERE entry = 21992",
            [],
        )
        .unwrap();
    assert_eq!(
        db.spell_effect_text(21992, trigger).unwrap(),
        "Chance on hit: Blasts your enemy for 300 Nature damage."
    );
}

/// Synced quests keep chain pointers across re-syncs.
#[test]
fn test_quest_sync_and_chain() {
    let source = MockSource::new()
        .with_page(EntityKind::Quest, 40001, quest_page("The Call"))
        .with_page(EntityKind::Quest, 40002, quest_page("The Road"))
        .with_page(EntityKind::Quest, 40003, quest_page("The End"));
    let svc = service(source);

    for id in 40001..=40003 {
        assert!(svc.sync_quest(id).success);
    }
    svc.db()
        .lock()
        .unwrap()
        .conn()
        .execute_batch(
            "UPDATE quest_template SET NextQuestInChain = 40002 WHERE entry = 40001;
             UPDATE quest_template SET PrevQuestId = 40001, NextQuestInChain = 40003 WHERE entry = 40002;
             UPDATE quest_template SET PrevQuestId = 40002 WHERE entry = 40003;",
        )
        .unwrap();

    let result = svc.full_sync_quests(FullSyncOptions::default(), None, &CancellationToken::new());
    assert_eq!(result.updated, 3);

    let chain = svc.db().lock().unwrap().build_chain(40002).unwrap();
    let steps: Vec<(i64, &str, i32)> = chain
        .iter()
        .map(|c| (c.entry, c.title.as_str(), c.depth))
        .collect();
    assert_eq!(
        steps,
        vec![
            (40001, "The Call", 0),
            (40002, "The Road", 0),
            (40003, "The End", 1),
        ]
    );
}

/// Import the addon hierarchy, then fetch what it references.
#[test]
fn test_atlas_import_then_backfill() {
    let addon = tempdir().unwrap();
    fs::create_dir_all(addon.path().join("Database")).unwrap();
    fs::create_dir_all(addon.path().join("Core")).unwrap();
    fs::write(
        addon.path().join("Database/WorldBosses.lua"),
        "AtlasLoot_Data[\"WorldBosses\"] = {\nAAzuregos = {\n    { 19019, \"INV_Sword_39\", \"=q5=Thunderfury\" },\n};\n",
    )
    .unwrap();
    fs::write(
        addon.path().join("Core/AtlasLoot.lua"),
        "AtlasLoot_HewdropDown = {\n    {[AL[\"World Bosses\"]] = {\n        {{ AL[\"Azuregos\"], \"AAzuregos\", \"Table\" },},\n    }},\n};\n",
    )
    .unwrap();

    let source = MockSource::new().with_page(EntityKind::Item, 19019, ITEM_PAGE);
    let svc = service(source);
    {
        let db = svc.db().lock().unwrap();
        let counts = import_atlas(&db, addon.path()).unwrap();
        assert_eq!((counts.categories, counts.modules, counts.tables, counts.items), (1, 1, 1, 1));
        assert_eq!(db.count_missing_atlas_items().unwrap(), 1);
    }

    let result = svc
        .import_missing_items(0, 0, &CancellationToken::new())
        .unwrap();
    assert_eq!(result.imported, 1);
    assert_eq!(svc.db().lock().unwrap().count_missing_atlas_items().unwrap(), 0);
}
