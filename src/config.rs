/// Configuration module for lootsync.
///
/// Handles loading, validating, and providing default configuration values.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ── Default value functions ──────────────────────────────────────────

fn default_db_path() -> String {
    "./lootsync.db".to_string()
}

fn default_base_url() -> String {
    "https://database.turtlecraft.gg".to_string()
}

fn default_addon_dir() -> String {
    "./addons/AtlasLoot".to_string()
}

fn default_workers() -> usize {
    10
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_quest_delay_ms() -> u64 {
    200
}

fn default_item_miss_threshold() -> u32 {
    10_000
}

fn default_quest_miss_threshold() -> u32 {
    20
}

fn default_quest_floor_id() -> i64 {
    40_000
}

fn default_max_errors() -> usize {
    10
}

fn default_user_agent() -> String {
    format!("lootsync/{}", env!("CARGO_PKG_VERSION"))
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Root of the AtlasLoot addon (contains `Core/` and `Database/`).
    #[serde(default = "default_addon_dir")]
    pub addon_dir: String,

    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay after each unit of work, per worker.
    #[serde(default)]
    pub delay_ms: u64,

    #[serde(default = "default_quest_delay_ms")]
    pub quest_delay_ms: u64,

    #[serde(default = "default_item_miss_threshold")]
    pub item_miss_threshold: u32,

    #[serde(default = "default_quest_miss_threshold")]
    pub quest_miss_threshold: u32,

    /// Custom quests start at this id; the quest scan never goes below it.
    #[serde(default = "default_quest_floor_id")]
    pub quest_floor_id: i64,

    #[serde(default = "default_max_errors")]
    pub max_errors: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            base_url: default_base_url(),
            addon_dir: default_addon_dir(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout_secs: default_timeout_secs(),
            delay_ms: 0,
            quest_delay_ms: default_quest_delay_ms(),
            item_miss_threshold: default_item_miss_threshold(),
            quest_miss_threshold: default_quest_miss_threshold(),
            quest_floor_id: default_quest_floor_id(),
            max_errors: default_max_errors(),
            user_agent: default_user_agent(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"lootsync.json"`.
    /// A missing file yields the defaults (and a template when the default
    /// path is used); invalid JSON is reported and also yields the defaults.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "lootsync.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == "lootsync.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let mut cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");

        // Trailing slash would produce "//?item=" URLs
        let trimmed = cfg.base_url.trim_end_matches('/').to_string();
        cfg.base_url = trimmed;

        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.base_url.is_empty(), "base_url must not be empty");
        anyhow::ensure!(self.sync.workers > 0, "sync.workers must be positive");
        anyhow::ensure!(
            self.sync.timeout_secs > 0,
            "sync.timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.sync.item_miss_threshold > 0,
            "sync.item_miss_threshold must be positive"
        );
        anyhow::ensure!(
            self.sync.quest_miss_threshold > 0,
            "sync.quest_miss_threshold must be positive"
        );
        Ok(())
    }

    #[must_use]
    pub fn addon_path(&self) -> PathBuf {
        PathBuf::from(&self.addon_dir)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.db_path, "./lootsync.db");
        assert_eq!(config.base_url, "https://database.turtlecraft.gg");
        assert_eq!(config.sync.workers, 10);
        assert_eq!(config.sync.timeout_secs, 10);
        assert_eq!(config.sync.item_miss_threshold, 10_000);
        assert_eq!(config.sync.quest_miss_threshold, 20);
        assert_eq!(config.sync.quest_floor_id, 40_000);
        assert_eq!(config.sync.max_errors, 10);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"db_path": "./test.db", "sync": {"workers": 4}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.db_path, "./test.db");
        assert_eq!(config.sync.workers, 4);
        // Other fields should have defaults
        assert_eq!(config.sync.timeout_secs, 10);
        assert_eq!(config.sync.quest_delay_ms, 200);
    }

    #[test]
    fn test_load_file_trims_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{"base_url": "http://localhost:8080/"}"#).unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_load_invalid_json_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.sync.workers, 10);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.db_path, "./lootsync.db");
        // Only the default path gets a generated template
        assert!(!path.exists());
    }

    #[test]
    fn test_validate_ok() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_workers() {
        let mut config = Config::default();
        config.sync.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_threshold() {
        let mut config = Config::default();
        config.sync.quest_miss_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.db_path, config.db_path);
        assert_eq!(parsed.sync.workers, config.sync.workers);
        assert_eq!(parsed.sync.user_agent, config.sync.user_agent);
    }
}
