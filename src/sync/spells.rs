use super::{
    FullSyncOptions, FullSyncResult, ProgressFn, SyncOneResult, SyncService, lock, pause,
    source::EntityKind,
};
use crate::db::models::SpellRecord;
use crate::error::SyncError;
use crate::parser::spell::parse_spell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

impl SyncService {
    /// Fetch and parse a spell page. A page without a name counts as absent.
    fn fetch_spell(&self, spell_id: i64) -> Result<SpellRecord, SyncError> {
        if spell_id <= 0 {
            return Err(SyncError::InvalidId {
                kind: "spell",
                id: spell_id,
            });
        }
        let page = self.source.fetch(EntityKind::Spell, spell_id)?;
        let (name, description) = parse_spell(&page);
        if name.is_empty() {
            return Err(SyncError::EmptyName {
                kind: "spell",
                id: spell_id,
            });
        }
        Ok(SpellRecord {
            entry: spell_id,
            name,
            description,
        })
    }

    /// Fetch a spell referenced by an item and store it unless the stored
    /// copy already has a real description. `fallback` (link text from the
    /// item page) stands in for a missing description. Returns true when the
    /// store changed.
    pub fn sync_spell_if_incomplete(&self, spell_id: i64, fallback: &str) -> Result<bool, SyncError> {
        if spell_id <= 0 {
            return Ok(false);
        }
        debug!("Syncing missing/incomplete spell {spell_id}");

        let mut spell = self.fetch_spell(spell_id)?;
        if spell.description.is_empty() && !fallback.is_empty() {
            debug!("Using fallback description from item page for spell {spell_id}");
            spell.description = fallback.to_string();
        }

        let changed = lock(&self.db).upsert_spell_if_incomplete(&spell)?;
        if changed {
            info!(
                "Synced spell {spell_id}: {} (desc len: {})",
                spell.name,
                spell.description.len()
            );
        }
        Ok(changed)
    }

    /// Dependent spell sync: failures are logged, never propagated.
    pub(crate) fn sync_dependent_spell(&self, spell_id: i64, fallback: &str) {
        match self.sync_spell_if_incomplete(spell_id, fallback) {
            Ok(_) => {}
            Err(SyncError::Fetch(e)) if e.is_not_found() => {
                debug!("Spell {spell_id} not found remotely");
            }
            Err(e) => warn!("Spell {spell_id} sync failed: {e}"),
        }
    }

    fn import_spell(&self, spell_id: i64) -> Result<String, SyncError> {
        let spell = self.fetch_spell(spell_id)?;
        lock(&self.db).upsert_spell(&spell)?;
        info!(
            "Synced spell {spell_id}: {} (desc len: {})",
            spell.name,
            spell.description.len()
        );
        Ok(spell.name)
    }

    /// Fetch one spell and insert or refresh it. An empty scraped
    /// description never overwrites a stored one.
    pub fn sync_spell(&self, spell_id: i64) -> SyncOneResult {
        SyncOneResult::from_outcome(spell_id, self.import_spell(spell_id))
    }

    /// Re-sync every spell referenced by stored items, one at a time.
    pub fn full_sync_spells(
        &self,
        options: FullSyncOptions,
        progress: Option<&ProgressFn<'_>>,
        token: &CancellationToken,
    ) -> FullSyncResult {
        let ids = match lock(&self.db).referenced_spell_ids(options.start_from.max(0)) {
            Ok(ids) => ids,
            Err(e) => return FullSyncResult::aborted(options.start_from, &e.into()),
        };
        let delay = options.delay_ms.unwrap_or(self.config.quest_delay_ms);
        let mut result = FullSyncResult::new(ids.len(), options.start_from);
        info!("[FullSync] Starting full sync of {} spells...", ids.len());

        for spell_id in ids {
            if token.is_cancelled() {
                break;
            }
            let label = match self.import_spell(spell_id) {
                Ok(name) => {
                    result.succeeded(spell_id);
                    name
                }
                Err(e) => {
                    result.failed(format!("Spell {spell_id}: {e}"), self.config.max_errors);
                    format!("Spell {spell_id}")
                }
            };
            result.tick(spell_id, &label, "spells", progress);
            pause(delay);
        }

        let done = format!(
            "Full spell sync complete: {} updated, {} failed",
            result.updated, result.failed
        );
        result.finish(token, done);
        result
    }
}
