use super::{
    Db,
    models::{ImportCounts, MissingItem},
};
use crate::parser::atlas::ParsedHierarchy;
use rusqlite::{Result, params};
use tracing::info;

impl Db {
    /// Replace the whole AtlasLoot hierarchy with `hierarchy`.
    ///
    /// All four tables are cleared and refilled inside one transaction, so a
    /// failed import leaves the previous hierarchy in place.
    pub fn import_hierarchy(&self, hierarchy: &ParsedHierarchy) -> Result<ImportCounts> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            "DELETE FROM atlasloot_items;
             DELETE FROM atlasloot_tables;
             DELETE FROM atlasloot_modules;
             DELETE FROM atlasloot_categories;",
        )?;

        let mut counts = ImportCounts::default();
        {
            let mut insert_category = tx.prepare(
                "INSERT INTO atlasloot_categories (name, display_name, sort_order) VALUES (?, ?, ?)",
            )?;
            let mut insert_module = tx.prepare(
                "INSERT INTO atlasloot_modules (category_id, name, display_name, sort_order)
                 VALUES (?, ?, ?, ?)",
            )?;
            let mut insert_table = tx.prepare(
                "INSERT INTO atlasloot_tables (module_id, table_key, display_name, sort_order)
                 VALUES (?, ?, ?, ?)",
            )?;
            let mut insert_item = tx.prepare(
                "INSERT INTO atlasloot_items
                    (table_id, item_id, spell_id, drop_chance, override_name, override_icon, quality, sort_order)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )?;

            for category in &hierarchy.categories {
                insert_category.execute(params![
                    category.key,
                    category.display_name,
                    category.sort_order
                ])?;
                let category_id = tx.last_insert_rowid();
                counts.categories += 1;

                for (position, module) in category.modules.iter().enumerate() {
                    insert_module.execute(params![
                        category_id,
                        module.key,
                        module.display_name,
                        position as i64
                    ])?;
                    let module_id = tx.last_insert_rowid();
                    counts.modules += 1;

                    for table in &module.tables {
                        insert_table.execute(params![
                            module_id,
                            table.key,
                            table.display_name,
                            table.sort_order
                        ])?;
                        let table_id = tx.last_insert_rowid();
                        counts.tables += 1;

                        for item in &table.items {
                            insert_item.execute(params![
                                table_id,
                                item.item_id,
                                item.spell_id,
                                item.drop_chance,
                                item.override_name,
                                item.override_icon,
                                item.quality,
                                item.sort_order
                            ])?;
                            counts.items += 1;
                        }
                    }
                }
            }
        }
        tx.commit()?;

        info!(
            "AtlasLoot import: {} categories, {} modules, {} tables, {} items",
            counts.categories, counts.modules, counts.tables, counts.items
        );
        Ok(counts)
    }

    /// AtlasLoot item ids with no `item_template` row, lowest id first.
    /// Each id appears once, tagged with the first table that lists it.
    /// `limit <= 0` means no limit.
    pub fn missing_atlas_items(&self, limit: i64) -> Result<Vec<MissingItem>> {
        let limit = if limit <= 0 { -1 } else { limit };
        let mut stmt = self.conn.prepare(
            "SELECT ai.item_id, t.table_key, t.display_name, MIN(t.id)
             FROM atlasloot_items ai
             JOIN atlasloot_tables t ON ai.table_id = t.id
             LEFT JOIN item_template i ON ai.item_id = i.entry
             WHERE i.entry IS NULL AND ai.item_id > 0
             GROUP BY ai.item_id
             ORDER BY ai.item_id
             LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(MissingItem {
                item_id: row.get(0)?,
                table_key: row.get(1)?,
                table_name: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    pub fn count_missing_atlas_items(&self) -> Result<i64> {
        self.conn.query_row(
            "SELECT COUNT(DISTINCT ai.item_id)
             FROM atlasloot_items ai
             LEFT JOIN item_template i ON ai.item_id = i.entry
             WHERE i.entry IS NULL AND ai.item_id > 0",
            [],
            |row| row.get(0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::atlas::{AtlasItem, ParsedCategory, ParsedModule, ParsedTable};

    fn atlas_item(item_id: i64, sort_order: i64) -> AtlasItem {
        AtlasItem {
            item_id,
            spell_id: 0,
            drop_chance: "10%".into(),
            override_name: String::new(),
            override_icon: String::new(),
            quality: 4,
            sort_order,
        }
    }

    fn sample() -> ParsedHierarchy {
        ParsedHierarchy {
            categories: vec![ParsedCategory {
                key: "Raids".into(),
                display_name: "Raids".into(),
                sort_order: 11,
                modules: vec![ParsedModule {
                    key: "MoltenCore".into(),
                    display_name: "Molten Core".into(),
                    tables: vec![
                        ParsedTable {
                            key: "MCLucifron".into(),
                            display_name: "Lucifron".into(),
                            sort_order: 0,
                            items: vec![atlas_item(100, 0), atlas_item(200, 1)],
                        },
                        ParsedTable {
                            key: "MCMagmadar".into(),
                            display_name: "Magmadar".into(),
                            sort_order: 1,
                            items: vec![atlas_item(200, 0), atlas_item(300, 1), atlas_item(0, 2)],
                        },
                    ],
                }],
            }],
        }
    }

    #[test]
    fn test_import_hierarchy_counts() {
        let db = Db::open_in_memory().unwrap();
        let counts = db.import_hierarchy(&sample()).unwrap();
        assert_eq!(
            counts,
            ImportCounts {
                categories: 1,
                modules: 1,
                tables: 2,
                items: 5
            }
        );
    }

    #[test]
    fn test_import_hierarchy_replaces_previous() {
        let db = Db::open_in_memory().unwrap();
        db.import_hierarchy(&sample()).unwrap();
        let second = db.import_hierarchy(&sample()).unwrap();
        assert_eq!(second.items, 5);

        let stored: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM atlasloot_items", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stored, 5);
        let categories: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM atlasloot_categories", [], |r| r.get(0))
            .unwrap();
        assert_eq!(categories, 1);
    }

    #[test]
    fn test_missing_atlas_items() {
        let db = Db::open_in_memory().unwrap();
        db.import_hierarchy(&sample()).unwrap();
        db.conn
            .execute("INSERT INTO item_template (entry, name) VALUES (200, 'Known')", [])
            .unwrap();

        let missing = db.missing_atlas_items(0).unwrap();
        let ids: Vec<i64> = missing.iter().map(|m| m.item_id).collect();
        assert_eq!(ids, vec![100, 300]);
        assert_eq!(missing[0].table_key, "MCLucifron");
        assert_eq!(missing[1].table_name, "Magmadar");

        assert_eq!(db.missing_atlas_items(1).unwrap().len(), 1);
        assert_eq!(db.count_missing_atlas_items().unwrap(), 2);
    }
}
