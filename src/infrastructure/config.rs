//! Configuration infrastructure
//!
//! Loading and management of engine settings. A missing config file is
//! created with defaults on first start; a corrupted one is backed up and
//! replaced instead of crashing the scheduler process.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::infrastructure::http_client::HttpClientConfig;

/// Hardcoded fallbacks used when no config file exists yet
pub mod defaults {
    pub const BASE_URL: &str = "https://aroma-euro.ru";
    pub const LISTING_PATH: &str = "perfume";
    pub const MAX_CONCURRENT_FETCHES: usize = 4;
    pub const RUN_BUDGET_MINUTES: u64 = 30;
    pub const MAX_PAGE_CEILING: u32 = 200;
    pub const SYNC_INTERVAL_MINUTES: u64 = 360;
    pub const MIN_SYNC_GAP_MINUTES: u64 = 60;
    pub const LOG_LEVEL: &str = "info";
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub http: HttpClientConfig,
    pub sync: SyncConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Where the external catalog lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub listing_path: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.to_string(),
            listing_path: defaults::LISTING_PATH.to_string(),
        }
    }
}

/// Run-level knobs of the synchronization engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Bounded worker pool size for page fetching
    pub max_concurrent_fetches: usize,
    /// Wall-clock ceiling on one run, the primary safety valve
    pub run_budget_minutes: u64,
    /// Hard cap on pagination discovery probing
    pub max_page_ceiling: u32,
    /// Interval between scheduled runs
    pub sync_interval_minutes: u64,
    /// Interval triggers are skipped when the last completed run is
    /// younger than this; manual triggers always go through
    pub min_sync_gap_minutes: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: defaults::MAX_CONCURRENT_FETCHES,
            run_budget_minutes: defaults::RUN_BUDGET_MINUTES,
            max_page_ceiling: defaults::MAX_PAGE_CEILING,
            sync_interval_minutes: defaults::SYNC_INTERVAL_MINUTES,
            min_sync_gap_minutes: defaults::MIN_SYNC_GAP_MINUTES,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite URL; defaults to a file under the platform data directory
    pub database_url: Option<String>,
}

impl StorageConfig {
    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }
        let dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("aroma-sync");
        format!("sqlite:{}", dir.join("catalog.db").display())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    pub file_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            file_output: false,
        }
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .context("Could not determine system config directory")?
            .join("aroma-sync");
        Ok(Self {
            config_path: config_dir.join("config.json"),
        })
    }

    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load the configuration, creating a default file when none exists
    pub async fn initialize(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            let config = AppConfig::default();
            self.save_config(&config).await?;
            info!("Created default config at {}", self.config_path.display());
            return Ok(config);
        }
        self.load_config().await
    }

    pub async fn load_config(&self) -> Result<AppConfig> {
        let content = tokio::fs::read_to_string(&self.config_path)
            .await
            .with_context(|| format!("Failed to read config: {}", self.config_path.display()))?;

        match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                // Keep the broken file around for inspection, then start fresh
                let backup_path = self.config_path.with_extension("json.corrupted");
                warn!(
                    "Config file is corrupted ({}), backing up to {} and using defaults",
                    e,
                    backup_path.display()
                );
                tokio::fs::rename(&self.config_path, &backup_path).await.ok();
                let config = AppConfig::default();
                self.save_config(&config).await?;
                Ok(config)
            }
        }
    }

    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize config")?;
        tokio::fs::write(&self.config_path, content)
            .await
            .with_context(|| format!("Failed to write config: {}", self.config_path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_initialize_creates_default_config() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("config.json"));

        let config = manager.initialize().await.unwrap();
        assert_eq!(config.source.base_url, defaults::BASE_URL);
        assert!(manager.config_path().exists());

        // Second initialize loads the same file
        let reloaded = manager.initialize().await.unwrap();
        assert_eq!(reloaded.sync.max_page_ceiling, config.sync.max_page_ceiling);
    }

    #[tokio::test]
    async fn test_corrupted_config_is_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let manager = ConfigManager::with_path(path.clone());
        let config = manager.load_config().await.unwrap();
        assert_eq!(config.logging.level, defaults::LOG_LEVEL);
        assert!(path.with_extension("json.corrupted").exists());
    }

    #[test]
    fn test_default_database_url_is_sqlite() {
        let storage = StorageConfig::default();
        assert!(storage.database_url().starts_with("sqlite:"));

        let explicit = StorageConfig {
            database_url: Some("sqlite::memory:".to_string()),
        };
        assert_eq!(explicit.database_url(), "sqlite::memory:");
    }
}
