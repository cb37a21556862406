//! # lootsync — Game Content Resolution & Sync Engine
//!
//! Normalizes scraped game content pages and AtlasLoot addon files into a
//! local SQLite store, and resolves derived views over that store at read
//! time.
//!
//! ## Architecture
//!
//! - **[`config`]** — JSON configuration loading and validation
//! - **[`error`]** — Fetch and sync error types
//! - **[`db`]** — SQLite store: loot flattening, quest chains, item/spell/quest upserts, hierarchy import
//! - **[`spelltext`]** — Spell description macro interpreter
//! - **[`parser`]** — Item/quest/spell page parsers and the AtlasLoot hierarchy parser
//! - **[`sync`]** — Remote sources, forward scans, full sync worker pool, missing-item import

pub mod config;
pub mod db;
pub mod error;
pub mod parser;
pub mod spelltext;
pub mod sync;
