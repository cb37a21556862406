use super::{
    CheckNewResult, FullSyncOptions, FullSyncResult, ProgressFn, ScanOptions, SyncOneResult,
    SyncService, lock, pause, run_pool, source::EntityKind,
};
use crate::db::items::log_item_diff;
use crate::db::models::ItemSet;
use crate::error::{FetchError, SyncError};
use crate::parser::item::{ParsedItem, parse_item};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Dependent entities already handled in the current run.
#[derive(Default)]
pub(crate) struct Visited {
    spells: Mutex<HashSet<i64>>,
    sets: Mutex<HashSet<i64>>,
}

impl Visited {
    fn first_spell(&self, id: i64) -> bool {
        lock(&self.spells).insert(id)
    }

    fn first_set(&self, id: i64) -> bool {
        lock(&self.sets).insert(id)
    }
}

impl SyncService {
    /// Fetch and parse an item page. The remote's not-found page maps to
    /// [`FetchError::NotFound`]; a page without a name is an error too.
    pub(crate) fn fetch_item(&self, item_id: i64) -> Result<ParsedItem, SyncError> {
        if item_id <= 0 {
            return Err(SyncError::InvalidId {
                kind: "item",
                id: item_id,
            });
        }
        let page = self.source.fetch(EntityKind::Item, item_id)?;
        let parsed = parse_item(&page, item_id).ok_or(FetchError::NotFound {
            kind: "item",
            id: item_id,
        })?;
        if parsed.item.name.is_empty() {
            return Err(SyncError::EmptyName {
                kind: "item",
                id: item_id,
            });
        }
        Ok(parsed)
    }

    fn sync_item_set(&self, set: &ItemSet, visited: &Visited) {
        if set.id <= 0 || !visited.first_set(set.id) {
            return;
        }
        if let Err(e) = lock(&self.db).upsert_item_set(set) {
            warn!("Item set {} store failed: {e}", set.id);
            return;
        }
        info!("Synced item set {}: {}", set.id, set.name);
        for spell_id in set.bonus_spells() {
            if visited.first_spell(spell_id) {
                self.sync_dependent_spell(spell_id, "");
            }
        }
    }

    /// Spells on the item and its set, each at most once per run.
    fn sync_item_dependencies(&self, parsed: &ParsedItem, visited: &Visited) {
        for spell in &parsed.item.spells {
            if spell.spell_id <= 0 || !visited.first_spell(spell.spell_id) {
                continue;
            }
            let fallback = parsed
                .spell_descriptions
                .get(&spell.spell_id)
                .map_or("", String::as_str);
            self.sync_dependent_spell(spell.spell_id, fallback);
        }
        if let Some(set) = &parsed.item_set {
            self.sync_item_set(set, visited);
        }
    }

    pub(crate) fn import_item(&self, item_id: i64, visited: &Visited) -> Result<String, SyncError> {
        let parsed = self.fetch_item(item_id)?;
        self.sync_item_dependencies(&parsed, visited);

        let db = lock(&self.db);
        db.write_item(&parsed.item)?;
        db.insert_dropped_by(item_id, &parsed.dropped_by)?;
        Ok(parsed.item.name)
    }

    /// Fetch one item and insert it, or merge it into the stored row.
    pub fn sync_item(&self, item_id: i64) -> SyncOneResult {
        SyncOneResult::from_outcome(item_id, self.import_item(item_id, &Visited::default()))
    }

    /// Store an item found by a forward scan. Existing rows are left alone.
    fn store_new_item(&self, parsed: &ParsedItem, visited: &Visited) -> Result<(), SyncError> {
        {
            let db = lock(&self.db);
            if db.insert_item_ignore(&parsed.item)? {
                info!("+ NEW ITEM {}: {}", parsed.item.entry, parsed.item.name);
            }
            db.insert_dropped_by(parsed.item.entry, &parsed.dropped_by)?;
        }
        self.sync_item_dependencies(parsed, visited);
        Ok(())
    }

    /// Scan for items above the highest stored entry, importing each hit
    /// as soon as it is found.
    pub fn check_new_items(
        &self,
        options: ScanOptions,
        token: &CancellationToken,
    ) -> Result<CheckNewResult, SyncError> {
        let start_id = lock(&self.db).max_item_id()? + 1;
        let threshold = options
            .miss_threshold
            .unwrap_or(self.config.item_miss_threshold);
        let visited = Visited::default();

        Ok(self.scan_forward(EntityKind::Item, start_id, threshold, options, token, |id| {
            let parsed = self.fetch_item(id)?;
            let imported = match self.store_new_item(&parsed, &visited) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Item {id} import failed: {e}");
                    false
                }
            };
            Ok((parsed.item.name, imported))
        }))
    }

    /// One full-sync unit. Errors come back already formatted for the summary.
    fn refresh_item(&self, item_id: i64, visited: &Visited) -> Result<String, String> {
        let parsed = self
            .fetch_item(item_id)
            .map_err(|e| format!("Item {item_id}: {e}"))?;

        let changes = lock(&self.db)
            .merge_update_item(&parsed.item)
            .map_err(|e| format!("Item {item_id} update: {e}"))?;
        log_item_diff(item_id, &parsed.item.name, &changes);

        self.sync_item_dependencies(&parsed, visited);
        if let Err(e) = lock(&self.db).insert_dropped_by(item_id, &parsed.dropped_by) {
            warn!("Item {item_id} dropped-by links failed: {e}");
        }
        Ok(parsed.item.name)
    }

    /// Re-fetch every stored item through the worker pool and merge the
    /// results. Fields the page does not carry keep their stored values.
    pub fn full_sync_items(
        &self,
        options: FullSyncOptions,
        progress: Option<&ProgressFn<'_>>,
        token: &CancellationToken,
    ) -> FullSyncResult {
        let ids = match lock(&self.db).item_ids(options.start_from.max(0)) {
            Ok(ids) => ids,
            Err(e) => return FullSyncResult::aborted(options.start_from, &e.into()),
        };
        let delay = options.delay_ms.unwrap_or(self.config.delay_ms);
        let max_errors = self.config.max_errors;
        let aggregate = Mutex::new(FullSyncResult::new(ids.len(), options.start_from));
        let visited = Visited::default();

        if options.start_from > 0 {
            info!("[FullSync] Resuming from item {}", options.start_from);
        }
        info!(
            "[FullSync] Starting full sync of {} items with {} workers...",
            ids.len(),
            self.config.workers
        );

        run_pool(&ids, self.config.workers, token, |item_id| {
            let outcome = self.refresh_item(item_id, &visited);
            {
                let mut result = lock(&aggregate);
                let label = match outcome {
                    Ok(name) => {
                        result.succeeded(item_id);
                        name
                    }
                    Err(message) => {
                        result.failed(message, max_errors);
                        format!("Item {item_id}")
                    }
                };
                result.tick(item_id, &label, "items", progress);
            }
            pause(delay);
        });

        let mut result = aggregate.into_inner().unwrap_or_else(PoisonError::into_inner);
        let done = format!(
            "Full sync complete: {} updated, {} failed",
            result.updated, result.failed
        );
        result.finish(token, done);
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SyncConfig;
    use crate::db::Db;
    use crate::sync::mock::MockSource;
    use crate::sync::source::EntityKind;
    use crate::sync::{FullSyncOptions, ScanOptions, SyncService, lock};
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    fn item_page(name: &str) -> String {
        format!("<html><title>{name} - Items - Turtle WoW Database</title><b class=\"q2\">{name}</b></html>")
    }

    fn item_page_with_spell(name: &str, spell_id: i64) -> String {
        format!(
            "<html><title>{name} - Items - Turtle WoW Database</title>\
             <span>Use: <a href=\"?spell={spell_id}\">Heals a friend.</a></span></html>"
        )
    }

    fn service(source: Arc<MockSource>) -> SyncService {
        let config = SyncConfig {
            workers: 4,
            delay_ms: 0,
            quest_delay_ms: 0,
            ..SyncConfig::default()
        };
        SyncService::new(
            Arc::new(Mutex::new(Db::open_in_memory().unwrap())),
            source,
            config,
        )
    }

    fn add_item(svc: &SyncService, entry: i64, name: &str) {
        lock(svc.db())
            .conn()
            .execute(
                "INSERT INTO item_template (entry, name, quality) VALUES (?, ?, 4)",
                rusqlite::params![entry, name],
            )
            .unwrap();
    }

    fn stored_name(svc: &SyncService, entry: i64) -> Option<String> {
        lock(svc.db()).item_name(entry).unwrap()
    }

    #[test]
    fn test_check_new_stops_after_miss_threshold() {
        let source = Arc::new(MockSource::new());
        let svc = service(source.clone());
        add_item(&svc, 100, "Last Known");

        let options = ScanOptions {
            miss_threshold: Some(5),
            ..Default::default()
        };
        let result = svc
            .check_new_items(options, &CancellationToken::new())
            .unwrap();

        assert_eq!(result.start_id, 101);
        assert_eq!(result.checked, 5);
        assert_eq!(result.next_id, 106);
        assert!(result.hits.is_empty());
        assert!(!result.stopped);
        assert_eq!(source.calls(), 5);
    }

    #[test]
    fn test_check_new_imports_hits_across_gaps() {
        let source = Arc::new(
            MockSource::new()
                .with_page(EntityKind::Item, 11, item_page("Found Ring"))
                .with_page(EntityKind::Item, 12, "<html>Item not found!</html>")
                .with_page(EntityKind::Item, 13, item_page("Found Cloak")),
        );
        let svc = service(source);
        add_item(&svc, 10, "Old Boots");

        let options = ScanOptions {
            miss_threshold: Some(3),
            ..Default::default()
        };
        let result = svc
            .check_new_items(options, &CancellationToken::new())
            .unwrap();

        assert_eq!(result.checked, 6);
        assert_eq!(result.next_id, 17);
        let found: Vec<i64> = result.hits.iter().map(|h| h.entry).collect();
        assert_eq!(found, vec![11, 13]);
        assert!(result.hits.iter().all(|h| h.imported));
        assert_eq!(result.hits[0].url, "mock://content/?item=11");
        assert_eq!(stored_name(&svc, 13).as_deref(), Some("Found Cloak"));
    }

    #[test]
    fn test_check_new_respects_budget_and_stop() {
        let svc = service(Arc::new(MockSource::new()));
        let options = ScanOptions {
            max_checks: 2,
            ..Default::default()
        };
        let result = svc
            .check_new_items(options, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.start_id, 1);
        assert_eq!(result.checked, 2);

        let token = CancellationToken::new();
        token.cancel();
        let result = svc.check_new_items(ScanOptions::default(), &token).unwrap();
        assert!(result.stopped);
        assert_eq!(result.checked, 0);
    }

    #[test]
    fn test_sync_item_outcomes() {
        let source = Arc::new(
            MockSource::new()
                .with_page(EntityKind::Item, 500, item_page("Fresh Blade"))
                .with_page(EntityKind::Item, 501, "<html><body>empty shell</body></html>")
                .with_page(EntityKind::Item, 502, "<html>Item not found</html>"),
        );
        let svc = service(source);

        let ok = svc.sync_item(500);
        assert!(ok.success);
        assert_eq!(ok.name, "Fresh Blade");
        assert_eq!(stored_name(&svc, 500).as_deref(), Some("Fresh Blade"));

        let shell = svc.sync_item(501);
        assert!(!shell.success);
        assert_eq!(shell.error.as_deref(), Some("item 501 exists but has no name"));

        let missing = svc.sync_item(502);
        assert_eq!(missing.error.as_deref(), Some("item not found: 502"));
        assert_eq!(stored_name(&svc, 502), None);
    }

    #[test]
    fn test_full_sync_cancelled_before_start() {
        let source = Arc::new(MockSource::new());
        let svc = service(source.clone());
        for id in 1..=20 {
            add_item(&svc, id, "Item");
        }
        let token = CancellationToken::new();
        token.cancel();

        let result = svc.full_sync_items(FullSyncOptions::default(), None, &token);
        assert_eq!(result.total, 20);
        assert_eq!(result.processed, 0);
        assert!(result.stopped);
        assert_eq!(result.message, "Sync stopped by user");
        assert!(result.finished_at.is_some());
        assert_eq!(source.calls(), 0);
    }

    #[test]
    fn test_full_sync_merges_and_dedupes_spells() {
        let source = Arc::new(
            MockSource::new()
                .with_page(EntityKind::Item, 1, item_page_with_spell("Renamed Gloves", 777))
                .with_page(EntityKind::Item, 2, item_page_with_spell("Healer Gloves", 777)),
        );
        let svc = service(source.clone());
        add_item(&svc, 1, "Old Gloves");
        add_item(&svc, 2, "Healer Gloves");
        add_item(&svc, 3, "Gone Gloves");

        let result = svc.full_sync_items(FullSyncOptions::default(), None, &CancellationToken::new());

        assert_eq!(result.total, 3);
        assert_eq!(result.processed, 3);
        assert_eq!(result.updated, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.last_synced_id, 2);
        assert_eq!(result.errors, vec!["Item 3: item not found: 3".to_string()]);
        assert_eq!(result.message, "Full sync complete: 2 updated, 1 failed");

        // Merge keeps the stored quality the page did not carry
        assert_eq!(stored_name(&svc, 1).as_deref(), Some("Renamed Gloves"));
        let quality: i64 = lock(svc.db())
            .conn()
            .query_row("SELECT quality FROM item_template WHERE entry = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(quality, 4);

        // Three item fetches plus the shared spell once
        assert_eq!(source.calls(), 4);
    }

    #[test]
    fn test_full_sync_resumes_from_id() {
        let source = Arc::new(MockSource::new().with_page(EntityKind::Item, 3, item_page("Third")));
        let svc = service(source);
        for id in 1..=3 {
            add_item(&svc, id, "Item");
        }
        let options = FullSyncOptions {
            start_from: 3,
            delay_ms: Some(0),
        };
        let result = svc.full_sync_items(options, None, &CancellationToken::new());
        assert_eq!(result.total, 1);
        assert_eq!(result.start_from_id, 3);
        assert_eq!(result.last_synced_id, 3);
        assert_eq!(stored_name(&svc, 3).as_deref(), Some("Third"));
    }
}
