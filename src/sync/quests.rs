use super::{
    CheckNewResult, FullSyncOptions, FullSyncResult, ProgressFn, ScanOptions, SyncOneResult,
    SyncService, lock, pause, source::EntityKind,
};
use crate::db::models::QuestRecord;
use crate::error::{FetchError, SyncError};
use crate::parser::quest::parse_quest;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

impl SyncService {
    /// Fetch and parse a quest page. A page without a title is a missing quest.
    fn fetch_quest(&self, quest_id: i64) -> Result<QuestRecord, SyncError> {
        if quest_id <= 0 {
            return Err(SyncError::InvalidId {
                kind: "quest",
                id: quest_id,
            });
        }
        let page = self.source.fetch(EntityKind::Quest, quest_id)?;
        let quest = parse_quest(&page, quest_id);
        if quest.title.is_empty() {
            return Err(FetchError::NotFound {
                kind: "quest",
                id: quest_id,
            }
            .into());
        }
        Ok(quest)
    }

    fn import_quest(&self, quest_id: i64) -> Result<String, SyncError> {
        let quest = self.fetch_quest(quest_id)?;
        lock(&self.db).upsert_quest(&quest)?;
        info!("Synced quest {quest_id}: {}", quest.title);
        Ok(quest.title)
    }

    /// Fetch one quest and merge it into the store. Chain pointers and any
    /// column the page does not carry are preserved.
    pub fn sync_quest(&self, quest_id: i64) -> SyncOneResult {
        SyncOneResult::from_outcome(quest_id, self.import_quest(quest_id))
    }

    /// Scan for custom quests above the highest stored one.
    pub fn check_new_quests(
        &self,
        options: ScanOptions,
        token: &CancellationToken,
    ) -> Result<CheckNewResult, SyncError> {
        let start_id = lock(&self.db).max_quest_id(self.config.quest_floor_id)? + 1;
        let threshold = options
            .miss_threshold
            .unwrap_or(self.config.quest_miss_threshold);

        Ok(self.scan_forward(EntityKind::Quest, start_id, threshold, options, token, |id| {
            let quest = self.fetch_quest(id)?;
            let imported = match lock(&self.db).upsert_quest(&quest) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Quest {id} import failed: {e}");
                    false
                }
            };
            Ok((quest.title, imported))
        }))
    }

    /// Re-sync every stored quest, one at a time.
    pub fn full_sync_quests(
        &self,
        options: FullSyncOptions,
        progress: Option<&ProgressFn<'_>>,
        token: &CancellationToken,
    ) -> FullSyncResult {
        let ids = match lock(&self.db).quest_ids(options.start_from.max(0)) {
            Ok(ids) => ids,
            Err(e) => return FullSyncResult::aborted(options.start_from, &e.into()),
        };
        let delay = options.delay_ms.unwrap_or(self.config.quest_delay_ms);
        let mut result = FullSyncResult::new(ids.len(), options.start_from);
        info!("[FullSync] Starting full sync of {} quests...", ids.len());

        for quest_id in ids {
            if token.is_cancelled() {
                break;
            }
            let label = match self.import_quest(quest_id) {
                Ok(title) => {
                    result.succeeded(quest_id);
                    title
                }
                Err(e) => {
                    result.failed(format!("Quest {quest_id}: {e}"), self.config.max_errors);
                    format!("Quest {quest_id}")
                }
            };
            result.tick(quest_id, &label, "quests", progress);
            pause(delay);
        }

        let done = format!(
            "Full quest sync complete: {} updated, {} failed",
            result.updated, result.failed
        );
        result.finish(token, done);
        result
    }
}
