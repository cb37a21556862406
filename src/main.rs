use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use lootsync::config::Config;
use lootsync::db::Db;
use lootsync::sync::atlas::import_atlas;
use lootsync::sync::{
    FullSyncOptions, FullSyncResult, HttpSource, ProgressFn, ScanOptions, SyncOneResult,
    SyncService,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lootsync")]
#[command(about = "Game content resolution and sync engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, global = true, default_value = "lootsync.json")]
    config: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScanKind {
    Items,
    Quests,
}

#[derive(Clone, Copy, ValueEnum)]
enum SyncKind {
    Items,
    Quests,
    Spells,
}

#[derive(Subcommand)]
enum Commands {
    /// Flattened loot of a creature
    Loot { creature: i64 },

    /// Flattened loot of a creature loot table id
    LootTable { table: i64 },

    /// Stored quest with side, races and chain
    Quest { quest: i64 },

    /// Prerequisite and follow-up chain of a quest
    Chain { quest: i64 },

    /// Expanded description of a stored spell
    SpellText {
        spell: i64,

        /// Prefix with the item trigger label (0 use, 1 equip, 2 chance on hit)
        #[arg(long)]
        trigger: Option<i64>,
    },

    /// Fetch one item and store it
    SyncItem { id: i64 },

    /// Fetch one quest and store it
    SyncQuest { id: i64 },

    /// Fetch one spell and store it
    SyncSpell { id: i64 },

    /// Scan for ids above the highest stored one
    CheckNew {
        kind: ScanKind,

        /// Maximum ids to check (0 = until the miss threshold)
        #[arg(long, default_value_t = 0)]
        max: i64,

        /// Pause after each hit, in milliseconds
        #[arg(long, default_value_t = 0)]
        delay: u64,

        /// Consecutive misses that end the scan
        #[arg(long)]
        threshold: Option<u32>,
    },

    /// Re-fetch every stored entity of a kind
    FullSync {
        kind: SyncKind,

        /// Resume from this id
        #[arg(long, default_value_t = 0)]
        start_from: i64,

        /// Pause after each unit, in milliseconds
        #[arg(long)]
        delay: Option<u64>,
    },

    /// Rebuild the AtlasLoot hierarchy from the addon files
    ImportAtlas {
        #[arg(long)]
        addon_dir: Option<PathBuf>,
    },

    /// List AtlasLoot items missing from the store
    MissingAtlas {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Fetch AtlasLoot items missing from the store
    ImportMissing {
        /// Maximum items to import (0 = all)
        #[arg(long, default_value_t = 0)]
        max: i64,

        #[arg(long, default_value_t = 0)]
        delay: u64,
    },

    /// Local store counters
    Stats,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}

fn print_sync_one(json: bool, kind: &str, result: &SyncOneResult) -> Result<()> {
    if json {
        return print_json(result);
    }
    match &result.error {
        None => println!("Synced {kind} {}: {}", result.id, result.name),
        Some(e) => println!("Failed {kind} {}: {e}", result.id),
    }
    Ok(())
}

fn print_full_sync(json: bool, result: &FullSyncResult) -> Result<()> {
    if json {
        return print_json(result);
    }
    println!("{}", result.message);
    println!(
        "processed {}/{}, last synced id {}",
        result.processed, result.total, result.last_synced_id
    );
    for e in &result.errors {
        println!("  {e}");
    }
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("  {bar:40.cyan/blue} {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("█▓░"));
    }
    pb
}

/// Build the service on a blocking thread (the HTTP client is blocking)
/// and run `f` there, with Ctrl-C wired to a cooperative stop.
async fn with_service<T, F>(config: &Config, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&SyncService) -> Result<T> + Send + 'static,
{
    let db = Db::open(&config.db_path).context("Failed to open database")?;
    let db = Arc::new(Mutex::new(db));
    let sync_config = config.sync.clone();
    let base_url = config.base_url.clone();

    let source = tokio::task::spawn_blocking(move || {
        HttpSource::new(
            &base_url,
            Duration::from_secs(sync_config.timeout_secs),
            &sync_config.user_agent,
        )
        .map(|source| (source, sync_config))
    })
    .await
    .context("source setup task failed")?;
    let (source, sync_config) = source.context("Failed to build HTTP client")?;

    let service = Arc::new(SyncService::new(db, Arc::new(source), sync_config));

    let stopper = Arc::clone(&service);
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Stop requested, finishing in-flight work...");
            stopper.request_stop();
        }
    });

    let worker = Arc::clone(&service);
    let result = tokio::task::spawn_blocking(move || f(&worker))
        .await
        .context("sync task failed")?;
    signal.abort();
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    config.validate()?;
    let json = cli.json;

    match cli.command {
        Commands::Loot { creature } => {
            let db = Db::open(&config.db_path).context("Failed to open database")?;
            print_json(&db.creature_loot(creature)?)?;
        }
        Commands::LootTable { table } => {
            let db = Db::open(&config.db_path).context("Failed to open database")?;
            print_json(&db.resolve_loot(table)?)?;
        }
        Commands::Quest { quest } => {
            let db = Db::open(&config.db_path).context("Failed to open database")?;
            let Some(detail) = db.quest_detail(quest)? else {
                anyhow::bail!("Quest {quest} is not in the store");
            };
            if json {
                print_json(&detail)?;
            } else {
                println!("{} [{}]", detail.title, detail.entry);
                println!(
                    "Level {} (requires {}), zone {}",
                    detail.quest_level, detail.min_level, detail.zone_or_sort
                );
                println!("Side: {} ({})", detail.side, detail.race_names);
                if !detail.details.is_empty() {
                    println!("\n{}", detail.details);
                }
                for step in &detail.chain {
                    let marker = if step.entry == quest { ">" } else { " " };
                    let indent = "  ".repeat(step.depth.max(0) as usize);
                    println!("{marker} {indent}{} [{}]", step.title, step.entry);
                }
            }
        }
        Commands::Chain { quest } => {
            let db = Db::open(&config.db_path).context("Failed to open database")?;
            let chain = db.build_chain(quest)?;
            if json {
                print_json(&chain)?;
            } else if chain.is_empty() {
                println!("Quest {quest} has no chain");
            } else {
                for step in &chain {
                    let marker = if step.entry == quest { ">" } else { " " };
                    let indent = "  ".repeat(step.depth.max(0) as usize);
                    println!("{marker} {indent}{} [{}]", step.title, step.entry);
                }
            }
        }
        Commands::SpellText { spell, trigger } => {
            let db = Db::open(&config.db_path).context("Failed to open database")?;
            let text = match trigger {
                Some(trigger) => db.spell_effect_text(spell, trigger)?,
                None => db.spell_text(spell)?,
            };
            if json {
                print_json(&serde_json::json!({ "spell": spell, "text": text }))?;
            } else {
                println!("{text}");
            }
        }
        Commands::SyncItem { id } => {
            let result = with_service(&config, move |svc| Ok(svc.sync_item(id))).await?;
            print_sync_one(json, "item", &result)?;
        }
        Commands::SyncQuest { id } => {
            let result = with_service(&config, move |svc| Ok(svc.sync_quest(id))).await?;
            print_sync_one(json, "quest", &result)?;
        }
        Commands::SyncSpell { id } => {
            let result = with_service(&config, move |svc| Ok(svc.sync_spell(id))).await?;
            print_sync_one(json, "spell", &result)?;
        }
        Commands::CheckNew {
            kind,
            max,
            delay,
            threshold,
        } => {
            let options = ScanOptions {
                max_checks: max,
                delay_ms: delay,
                miss_threshold: threshold,
            };
            let result = with_service(&config, move |svc| {
                let token = svc.stop_control().token();
                let result = match kind {
                    ScanKind::Items => svc.check_new_items(options, &token)?,
                    ScanKind::Quests => svc.check_new_quests(options, &token)?,
                };
                Ok(result)
            })
            .await?;
            if json {
                print_json(&result)?;
            } else {
                println!(
                    "Checked {} ids from {} (next {}), found {}{}",
                    result.checked,
                    result.start_id,
                    result.next_id,
                    result.hits.len(),
                    if result.stopped { ", stopped" } else { "" }
                );
                for hit in &result.hits {
                    println!("  {}: {} {}", hit.entry, hit.name, hit.url);
                }
            }
        }
        Commands::FullSync {
            kind,
            start_from,
            delay,
        } => {
            let options = FullSyncOptions {
                start_from,
                delay_ms: delay,
            };
            let pb = progress_bar();
            let bar = pb.clone();
            let result = with_service(&config, move |svc| {
                let progress = move |current: usize, total: usize, _id: i64, label: &str| {
                    bar.set_length(total as u64);
                    bar.set_position(current as u64);
                    bar.set_message(label.to_string());
                };
                let progress: &ProgressFn<'_> = &progress;
                let token = svc.stop_control().token();
                Ok(match kind {
                    SyncKind::Items => svc.full_sync_items(options, Some(progress), &token),
                    SyncKind::Quests => svc.full_sync_quests(options, Some(progress), &token),
                    SyncKind::Spells => svc.full_sync_spells(options, Some(progress), &token),
                })
            })
            .await?;
            pb.finish_and_clear();
            print_full_sync(json, &result)?;
        }
        Commands::ImportAtlas { addon_dir } => {
            let addon_dir = addon_dir.unwrap_or_else(|| config.addon_path());
            let db = Db::open(&config.db_path).context("Failed to open database")?;
            let counts = import_atlas(&db, &addon_dir)?;
            if json {
                print_json(&counts)?;
            } else {
                println!(
                    "Imported {} categories, {} modules, {} tables, {} items",
                    counts.categories, counts.modules, counts.tables, counts.items
                );
            }
        }
        Commands::MissingAtlas { limit } => {
            let db = Db::open(&config.db_path).context("Failed to open database")?;
            let missing = db.missing_atlas_items(limit)?;
            if json {
                print_json(&missing)?;
            } else {
                let total = db.count_missing_atlas_items()?;
                println!("{total} AtlasLoot items missing from the store");
                for m in &missing {
                    println!("  {} ({}: {})", m.item_id, m.table_key, m.table_name);
                }
            }
        }
        Commands::ImportMissing { max, delay } => {
            let result = with_service(&config, move |svc| {
                let token = svc.stop_control().token();
                Ok(svc.import_missing_items(max, delay, &token)?)
            })
            .await?;
            if json {
                print_json(&result)?;
            } else {
                println!(
                    "Checked {}, imported {}, failed {}",
                    result.checked, result.imported, result.failed
                );
                for item in &result.items {
                    println!("  {}: {}", item.item_id, item.name);
                }
                for e in &result.errors {
                    println!("  {e}");
                }
            }
        }
        Commands::Stats => {
            let stats = with_service(&config, |svc| Ok(svc.stats()?)).await?;
            if json {
                print_json(&stats)?;
            } else {
                println!("items:    {} (max id {})", stats.item_count, stats.max_item_id);
                println!("quests:   {} (max id {})", stats.quest_count, stats.max_quest_id);
                println!("spells:   {}", stats.spell_count);
                println!("npcs:     {}", stats.creature_count);
                println!("atlas items missing: {}", stats.missing_atlas_items);
            }
        }
    }

    info!("Done");
    Ok(())
}
