//! AtlasLoot import: read the addon files, rebuild the hierarchy tables and
//! backfill items the hierarchy references but the store lacks.
use super::items::Visited;
use super::{SyncService, lock, pause, run_pool};
use crate::db::Db;
use crate::db::models::ImportCounts;
use crate::error::SyncError;
use crate::parser::atlas::{
    HierarchySources, ParsedHierarchy, parse_hierarchy, parse_loot_tables, parse_special_menus,
    parse_table_register,
};
use anyhow::{Context, Result, ensure};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Loot table files under `Database/`, in load order.
const LOOT_FILES: [&str; 7] = [
    "Instances.lua",
    "Sets.lua",
    "Factions.lua",
    "PvP.lua",
    "WorldBosses.lua",
    "WorldEvents.lua",
    "Crafting.lua",
];
const REGISTER_FILE: &str = "TableRegister.lua";
const CORE_FILE: &str = "AtlasLoot.lua";

/// Raw addon text, read in full before parsing.
#[derive(Debug, Clone, Default)]
pub struct AtlasSources {
    pub loot_files: Vec<String>,
    pub register: String,
    /// `Core/AtlasLoot.lua`: menu list and the main dropdown hierarchy.
    pub core: String,
    /// Every `Core/*.lua` file, searched for menu-building functions.
    pub core_files: Vec<String>,
}

fn read_optional(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Skipping {}: {e}", path.display());
            None
        }
    }
}

fn lua_files(dir: &Path) -> Vec<PathBuf> {
    let pattern = dir.join("*.lua");
    let matches = match glob::glob(&pattern.to_string_lossy()) {
        Ok(matches) => matches,
        Err(e) => {
            warn!("Bad pattern {}: {e}", pattern.display());
            return Vec::new();
        }
    };
    let mut files = Vec::new();
    for entry in matches {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => warn!("Skipping {}: {}", e.path().display(), e.error()),
        }
    }
    if files.is_empty() {
        warn!("No Lua files in {}", dir.display());
    }
    files.sort();
    files
}

/// Read the addon files the importer needs. A missing file is skipped with a
/// warning; only a missing addon directory is an error.
pub fn load_sources(addon_dir: &Path) -> Result<AtlasSources> {
    ensure!(
        addon_dir.is_dir(),
        "AtlasLoot directory not found: {}",
        addon_dir.display()
    );
    let database = addon_dir.join("Database");
    let core_dir = addon_dir.join("Core");

    let loot_files = LOOT_FILES
        .iter()
        .filter_map(|name| read_optional(&database.join(name)))
        .collect();
    let register = read_optional(&database.join(REGISTER_FILE)).unwrap_or_default();
    let core = read_optional(&core_dir.join(CORE_FILE)).unwrap_or_default();
    let core_files = lua_files(&core_dir)
        .iter()
        .filter_map(|path| read_optional(path))
        .collect();

    Ok(AtlasSources {
        loot_files,
        register,
        core,
        core_files,
    })
}

/// Parse loaded addon text into the hierarchy. `db` supplies the item name
/// map used to resolve spell and name-only rows.
pub fn build_hierarchy(sources: &AtlasSources, db: &Db) -> Result<ParsedHierarchy> {
    let mut hierarchy_sources = HierarchySources {
        display_names: parse_table_register(&sources.register),
        special_menus: parse_special_menus(&sources.core, &sources.core_files),
        item_names: db.item_name_map().context("Failed to load item names")?,
        ..Default::default()
    };
    // A later file overrides an earlier one on duplicate table keys
    for text in &sources.loot_files {
        hierarchy_sources.loot_tables.extend(parse_loot_tables(text));
    }
    info!(
        "Loaded {} loot tables, {} display names, {} special menus",
        hierarchy_sources.loot_tables.len(),
        hierarchy_sources.display_names.len(),
        hierarchy_sources.special_menus.len()
    );

    Ok(parse_hierarchy(&sources.core, &hierarchy_sources))
}

/// Rebuild the AtlasLoot hierarchy tables from the addon directory.
pub fn import_atlas(db: &Db, addon_dir: &Path) -> Result<ImportCounts> {
    info!("Importing AtlasLoot data from {}", addon_dir.display());
    let sources = load_sources(addon_dir)?;
    let hierarchy = build_hierarchy(&sources, db)?;
    db.import_hierarchy(&hierarchy)
        .context("Failed to store AtlasLoot hierarchy")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedItem {
    pub item_id: i64,
    pub name: String,
}

/// Summary of a missing-item import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    pub checked: usize,
    pub imported: usize,
    pub failed: usize,
    pub items: Vec<ImportedItem>,
    pub errors: Vec<String>,
    pub stopped: bool,
}

impl SyncService {
    /// Fetch items that AtlasLoot lists but the store lacks, lowest id first,
    /// through the worker pool. `max <= 0` imports all of them.
    pub fn import_missing_items(
        &self,
        max: i64,
        delay_ms: u64,
        token: &CancellationToken,
    ) -> Result<ImportResult, SyncError> {
        let missing = lock(&self.db).missing_atlas_items(max)?;
        let ids: Vec<i64> = missing.iter().map(|m| m.item_id).collect();
        info!("Importing {} missing AtlasLoot items...", ids.len());

        let max_errors = self.config.max_errors;
        let aggregate = Mutex::new(ImportResult::default());
        let visited = Visited::default();
        run_pool(&ids, self.config.workers, token, |item_id| {
            let outcome = self.import_item(item_id, &visited);
            {
                let mut result = lock(&aggregate);
                result.checked += 1;
                match outcome {
                    Ok(name) => {
                        result.imported += 1;
                        result.items.push(ImportedItem { item_id, name });
                    }
                    Err(e) => {
                        result.failed += 1;
                        if result.errors.len() < max_errors {
                            result.errors.push(format!("Item {item_id}: {e}"));
                        }
                    }
                }
            }
            pause(delay_ms);
        });

        let mut result = aggregate.into_inner().unwrap_or_else(PoisonError::into_inner);
        result.items.sort_by_key(|i| i.item_id);
        result.stopped = token.is_cancelled();
        info!(
            "Missing item import: {} checked, {} imported, {} failed",
            result.checked, result.imported, result.failed
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::sync::mock::MockSource;
    use crate::sync::source::EntityKind;
    use std::sync::Arc;
    use tempfile::TempDir;

    const INSTANCES: &str = r#"
AtlasLoot_Data["Instances"] = {
AAzuregos = {
    { 19131, "INV_Boots_05", "=q4=Snowblind Shoes" },
    { 17070, "INV_Sword_39", "=q4=Fang of the Mystics" },
};
"#;

    const REGISTER: &str = r#"
AtlasLoot_TableNames = {
    ["AAzuregos"] = { AL["Azuregos"], "AtlasLootItems" };
};
"#;

    const CORE: &str = r#"
AtlasLoot_HewdropDown = {
    {[AL["World"]] = {
        {{ AL["Azuregos"], "AAzuregos", "Table" },},
    }},
};
"#;

    fn addon_dir() -> TempDir {
        addon_dir_with(INSTANCES)
    }

    fn addon_dir_with(instances: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("Database")).unwrap();
        fs::create_dir_all(dir.path().join("Core")).unwrap();
        fs::write(dir.path().join("Database/Instances.lua"), instances).unwrap();
        fs::write(dir.path().join("Database/TableRegister.lua"), REGISTER).unwrap();
        fs::write(dir.path().join("Core/AtlasLoot.lua"), CORE).unwrap();
        fs::write(dir.path().join("Core/notes.txt"), "ignored").unwrap();
        dir
    }

    #[test]
    fn test_load_sources_skips_missing_files() {
        let dir = addon_dir();
        let sources = load_sources(dir.path()).unwrap();
        assert_eq!(sources.loot_files.len(), 1);
        assert!(sources.register.contains("AAzuregos"));
        assert!(sources.core.contains("HewdropDown"));
        assert_eq!(sources.core_files.len(), 1);

        assert!(load_sources(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_lua_files_sorted_lua_only() {
        let dir = addon_dir();
        let core = dir.path().join("Core");
        fs::write(core.join("Menus.lua"), "function AtlasLoot_Menus() end").unwrap();
        fs::create_dir_all(core.join("sub.lua")).unwrap();

        let names: Vec<String> = lua_files(&core)
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["AtlasLoot.lua", "Menus.lua"]);
        assert!(lua_files(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn test_import_atlas_and_reimport() {
        let dir = addon_dir();
        let db = Db::open_in_memory().unwrap();
        db.conn
            .execute("INSERT INTO item_template (entry, name) VALUES (19131, 'Snowblind Shoes')", [])
            .unwrap();

        let expected = ImportCounts {
            categories: 1,
            modules: 1,
            tables: 1,
            items: 2,
        };
        assert_eq!(import_atlas(&db, dir.path()).unwrap(), expected);
        assert_eq!(import_atlas(&db, dir.path()).unwrap(), expected);

        let missing = db.missing_atlas_items(0).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].item_id, 17070);
        assert_eq!(missing[0].table_key, "AAzuregos");
    }

    #[test]
    fn test_import_missing_items() {
        let dir = addon_dir();
        let source = MockSource::new().with_page(
            EntityKind::Item,
            17070,
            "<title>Fang of the Mystics - Items - Turtle WoW Database</title>",
        );
        let config = SyncConfig {
            workers: 2,
            ..SyncConfig::default()
        };
        let db = Db::open_in_memory().unwrap();
        import_atlas(&db, dir.path()).unwrap();
        let svc = SyncService::new(Arc::new(Mutex::new(db)), Arc::new(source), config);

        let result = svc
            .import_missing_items(0, 0, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.checked, 2);
        assert_eq!(result.imported, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(
            result.items,
            vec![ImportedItem {
                item_id: 17070,
                name: "Fang of the Mystics".to_string(),
            }]
        );
        assert_eq!(result.errors, vec!["Item 19131: item not found: 19131".to_string()]);
        assert_eq!(lock(svc.db()).count_missing_atlas_items().unwrap(), 1);
    }

    #[test]
    fn test_import_missing_fetches_shared_spell_once() {
        let dir = addon_dir_with(
            r#"
AtlasLoot_Data["Instances"] = {
AAzuregos = {
    { 21, "INV_Gauntlets_01", "=q3=Healer Gloves" },
    { 22, "INV_Gauntlets_02", "=q3=Mender Gloves" },
    { 23, "INV_Gauntlets_03", "=q3=Soother Gloves" },
};
"#,
        );
        let mut source = MockSource::new();
        for (id, name) in [(21, "Healer Gloves"), (22, "Mender Gloves"), (23, "Soother Gloves")] {
            source = source.with_page(
                EntityKind::Item,
                id,
                format!(
                    "<title>{name} - Items - Turtle WoW Database</title>\
                     <span>Use: <a href=\"?spell=777\">Heals a friend.</a></span>"
                ),
            );
        }
        let source = Arc::new(source);
        let config = SyncConfig {
            workers: 1,
            ..SyncConfig::default()
        };
        let db = Db::open_in_memory().unwrap();
        import_atlas(&db, dir.path()).unwrap();
        let svc = SyncService::new(Arc::new(Mutex::new(db)), source.clone(), config);

        let result = svc
            .import_missing_items(0, 0, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.imported, 3);
        // Three item pages plus spell 777 once
        assert_eq!(source.calls(), 4);
    }
}
