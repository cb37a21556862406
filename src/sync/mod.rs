//! Content sync orchestrator.
//!
//! Pulls item, quest and spell pages from a [`RemoteSource`], parses them
//! and merges the result into the store. Long-running operations take a
//! [`CancellationToken`] and poll it between units of work.
pub mod atlas;
pub mod items;
pub mod mock;
pub mod quests;
pub mod source;
pub mod spells;

use crate::config::SyncConfig;
use crate::db::Db;
use crate::error::SyncError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use source::{EntityKind, RemoteSource};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use source::HttpSource;

/// Progress hook: `(current, total, id, label)`.
pub type ProgressFn<'a> = dyn Fn(usize, usize, i64, &str) + Send + Sync + 'a;

/// Log full-sync progress every this many processed units.
const PROGRESS_LOG_EVERY: usize = 50;

/// Lock a mutex, recovering the data if a worker panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Idempotent, resettable stop flag.
///
/// A cancelled token stays cancelled, so resetting swaps in a fresh one.
/// Runs started before a reset keep observing the token they were given.
#[derive(Default)]
pub struct StopControl {
    token: Mutex<CancellationToken>,
}

impl StopControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        lock(&self.token).cancel();
    }

    pub fn is_stopped(&self) -> bool {
        lock(&self.token).is_cancelled()
    }

    pub fn reset_stop(&self) {
        let mut token = lock(&self.token);
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    /// Token to hand to the next long-running call.
    pub fn token(&self) -> CancellationToken {
        lock(&self.token).clone()
    }
}

/// Outcome of a single-entity sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOneResult {
    pub success: bool,
    pub id: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOneResult {
    pub(crate) fn from_outcome(id: i64, outcome: Result<String, SyncError>) -> Self {
        match outcome {
            Ok(name) => Self {
                success: true,
                id,
                name,
                error: None,
            },
            Err(e) => Self {
                success: false,
                id,
                name: String::new(),
                error: Some(e.to_string()),
            },
        }
    }
}

/// An entity discovered by a forward scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteHit {
    pub entry: i64,
    pub name: String,
    pub url: String,
    /// False when the page was found but storing it failed.
    pub imported: bool,
}

/// Knobs for a forward scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// Upper bound on ids checked; `<= 0` means unbounded.
    pub max_checks: i64,
    /// Pause after each hit.
    pub delay_ms: u64,
    /// Consecutive misses that end the scan; `None` uses the configured default.
    pub miss_threshold: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckNewResult {
    pub start_id: i64,
    pub checked: i64,
    /// First id that was not checked.
    pub next_id: i64,
    pub hits: Vec<RemoteHit>,
    pub stopped: bool,
}

/// Knobs for a full re-sync.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullSyncOptions {
    /// Skip ids below this one (resume point); `<= 0` means from the start.
    pub start_from: i64,
    /// Pause after each unit; `None` uses the configured default for the kind.
    pub delay_ms: Option<u64>,
}

/// Aggregate summary of a full sync or bulk import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullSyncResult {
    pub total: usize,
    pub processed: usize,
    pub updated: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub message: String,
    /// Highest id synced successfully in this run.
    pub last_synced_id: i64,
    pub start_from_id: i64,
    pub stopped: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl FullSyncResult {
    pub(crate) fn new(total: usize, start_from_id: i64) -> Self {
        Self {
            total,
            processed: 0,
            updated: 0,
            failed: 0,
            errors: Vec::new(),
            message: String::new(),
            last_synced_id: 0,
            start_from_id,
            stopped: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// A run that could not start (e.g. the id query failed).
    pub(crate) fn aborted(start_from_id: i64, err: &SyncError) -> Self {
        let mut result = Self::new(0, start_from_id);
        result.message = format!("Error querying ids: {err}");
        result.errors.push(err.to_string());
        result.finished_at = Some(Utc::now());
        result
    }

    pub(crate) fn succeeded(&mut self, id: i64) {
        self.updated += 1;
        self.last_synced_id = self.last_synced_id.max(id);
    }

    pub(crate) fn failed(&mut self, message: String, max_errors: usize) {
        self.failed += 1;
        if self.errors.len() < max_errors {
            self.errors.push(message);
        }
    }

    /// Count one finished unit and report it.
    pub(crate) fn tick(&mut self, id: i64, label: &str, kind: &str, progress: Option<&ProgressFn<'_>>) {
        self.processed += 1;
        if let Some(progress) = progress {
            progress(self.processed, self.total, id, label);
        }
        if self.processed % PROGRESS_LOG_EVERY == 0 {
            info!("[FullSync] Progress: {}/{} {kind}", self.processed, self.total);
        }
    }

    pub(crate) fn finish(&mut self, token: &CancellationToken, done_message: String) {
        self.stopped = token.is_cancelled();
        self.message = if self.stopped {
            "Sync stopped by user".to_string()
        } else {
            done_message
        };
        self.finished_at = Some(Utc::now());
        info!("[FullSync] {}", self.message);
    }
}

pub(crate) fn pause(delay_ms: u64) {
    if delay_ms > 0 {
        thread::sleep(Duration::from_millis(delay_ms));
    }
}

/// Run `work` over `ids` on a fixed set of worker threads fed through a
/// bounded queue. Once the token is cancelled no new unit starts; queued
/// ids are drained without being processed.
pub(crate) fn run_pool<F>(ids: &[i64], workers: usize, token: &CancellationToken, work: F)
where
    F: Fn(i64) + Sync,
{
    if ids.is_empty() {
        return;
    }
    let workers = workers.clamp(1, ids.len());
    let (tx, rx) = mpsc::sync_channel::<i64>(workers * 2);
    let rx = Mutex::new(rx);

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    // The queue guard must drop before the unit runs
                    let next = lock(&rx).recv();
                    let Ok(id) = next else { break };
                    if token.is_cancelled() {
                        continue;
                    }
                    work(id);
                }
            });
        }

        for &id in ids {
            if token.is_cancelled() {
                debug!("Stop requested, no more jobs queued");
                break;
            }
            if tx.send(id).is_err() {
                break;
            }
        }
        drop(tx);
    });
}

/// Orchestrates remote sync against one store.
pub struct SyncService {
    db: Arc<Mutex<Db>>,
    source: Arc<dyn RemoteSource>,
    config: SyncConfig,
    stop: StopControl,
}

impl SyncService {
    pub fn new(db: Arc<Mutex<Db>>, source: Arc<dyn RemoteSource>, config: SyncConfig) -> Self {
        Self {
            db,
            source,
            config,
            stop: StopControl::new(),
        }
    }

    pub fn db(&self) -> &Arc<Mutex<Db>> {
        &self.db
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn stop_control(&self) -> &StopControl {
        &self.stop
    }

    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn reset_stop(&self) {
        self.stop.reset_stop();
    }

    pub(crate) fn url(&self, kind: EntityKind, id: i64) -> String {
        self.source.url(kind, id)
    }

    /// Local store counters.
    pub fn stats(&self) -> Result<SyncStats, SyncError> {
        let db = lock(&self.db);
        let count = |sql: &str| -> rusqlite::Result<i64> {
            db.conn().query_row(sql, [], |row| row.get(0))
        };
        let floor = self.config.quest_floor_id;
        Ok(SyncStats {
            item_count: count("SELECT COUNT(*) FROM item_template")?,
            max_item_id: db.max_item_id()?,
            quest_count: db.conn().query_row(
                "SELECT COUNT(*) FROM quest_template WHERE entry >= ?",
                [floor],
                |row| row.get(0),
            )?,
            max_quest_id: db.max_quest_id(floor)?,
            spell_count: count("SELECT COUNT(*) FROM spell_template")?,
            creature_count: count("SELECT COUNT(*) FROM creature_template")?,
            missing_atlas_items: db.count_missing_atlas_items()?,
        })
    }

    /// Check ids upward from `start_id`, one at a time, until `threshold`
    /// consecutive misses, the check budget, or a stop. `check_id` returns the
    /// hit's name and whether storing it succeeded; any error is a miss.
    pub(crate) fn scan_forward<F>(
        &self,
        kind: EntityKind,
        start_id: i64,
        threshold: u32,
        options: ScanOptions,
        token: &CancellationToken,
        mut check_id: F,
    ) -> CheckNewResult
    where
        F: FnMut(i64) -> Result<(String, bool), SyncError>,
    {
        let mut result = CheckNewResult {
            start_id,
            next_id: start_id,
            ..Default::default()
        };
        let mut misses = 0u32;
        info!("[CheckNew] Scanning {kind}s from {start_id} (miss threshold {threshold})");

        while options.max_checks <= 0 || result.checked < options.max_checks {
            if token.is_cancelled() {
                result.stopped = true;
                info!("[CheckNew] Stop requested at {kind} {}", result.next_id);
                break;
            }
            let id = result.next_id;
            result.checked += 1;
            result.next_id += 1;

            match check_id(id) {
                Ok((name, imported)) => {
                    misses = 0;
                    info!("[CheckNew] Found {kind} {id}: {name}");
                    result.hits.push(RemoteHit {
                        entry: id,
                        url: self.url(kind, id),
                        name,
                        imported,
                    });
                    pause(options.delay_ms);
                }
                Err(SyncError::Fetch(e)) if e.is_not_found() => {
                    misses += 1;
                    debug!("{kind} {id} not found ({misses} consecutive misses)");
                }
                Err(SyncError::EmptyName { .. }) => {
                    misses += 1;
                    debug!("{kind} {id} has no name ({misses} consecutive misses)");
                }
                Err(e) => {
                    misses += 1;
                    warn!("[CheckNew] {kind} {id}: {e}");
                }
            }

            if misses >= threshold {
                info!("[CheckNew] {threshold} consecutive misses after {kind} {id}, stopping");
                break;
            }
        }

        info!(
            "[CheckNew] Checked {} {kind}s, found {}",
            result.checked,
            result.hits.len()
        );
        result
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub item_count: i64,
    pub max_item_id: i64,
    /// Custom quests only (ids at or above the quest floor).
    pub quest_count: i64,
    pub max_quest_id: i64,
    pub spell_count: i64,
    pub creature_count: i64,
    pub missing_atlas_items: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_stop_control_cycle() {
        let stop = StopControl::new();
        let first = stop.token();
        assert!(!stop.is_stopped());

        stop.request_stop();
        stop.request_stop();
        assert!(stop.is_stopped());
        assert!(first.is_cancelled());

        stop.reset_stop();
        assert!(!stop.is_stopped());
        assert!(!stop.token().is_cancelled());
        // Tokens handed out before the reset stay cancelled
        assert!(first.is_cancelled());
    }

    #[test]
    fn test_pool_processes_every_id_once() {
        let ids: Vec<i64> = (1..=200).collect();
        let seen = Mutex::new(HashSet::new());
        run_pool(&ids, 8, &CancellationToken::new(), |id| {
            assert!(lock(&seen).insert(id));
        });
        assert_eq!(lock(&seen).len(), 200);
    }

    #[test]
    fn test_pool_cancelled_before_start_does_nothing() {
        let ids: Vec<i64> = (1..=50).collect();
        let token = CancellationToken::new();
        token.cancel();
        let count = Mutex::new(0);
        run_pool(&ids, 4, &token, |_| *lock(&count) += 1);
        assert_eq!(*lock(&count), 0);
    }

    #[test]
    fn test_pool_stops_mid_run() {
        let ids: Vec<i64> = (1..=500).collect();
        let token = CancellationToken::new();
        let count = Mutex::new(0usize);
        run_pool(&ids, 2, &token, |_| {
            let mut n = lock(&count);
            *n += 1;
            if *n == 10 {
                token.cancel();
            }
        });
        let n = *lock(&count);
        assert!(n >= 10 && n < 500, "processed {n}");
    }

    #[test]
    fn test_result_bookkeeping() {
        let mut result = FullSyncResult::new(3, 0);
        result.succeeded(9);
        result.succeeded(4);
        result.failed("Item 5: boom".into(), 1);
        result.failed("Item 6: boom".into(), 1);
        assert_eq!(result.updated, 2);
        assert_eq!(result.failed, 2);
        assert_eq!(result.last_synced_id, 9);
        assert_eq!(result.errors, vec!["Item 5: boom".to_string()]);
    }

    #[test]
    fn test_sync_one_result_from_outcome() {
        let ok = SyncOneResult::from_outcome(3, Ok("Sword".into()));
        assert!(ok.success);
        assert_eq!(ok.name, "Sword");

        let err = SyncOneResult::from_outcome(
            4,
            Err(SyncError::EmptyName { kind: "item", id: 4 }),
        );
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("item 4 exists but has no name"));
    }
}
