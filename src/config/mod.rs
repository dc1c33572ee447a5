//! # Configuration
//!
//! Wildgrid reads a single TOML file with two sections:
//!
//! ```toml
//! [world]
//! data_dir = "./data/world"
//! catalog_path = "./data/catalog.json"
//! tick_interval_ms = 1000
//! active_ttl_secs = 10
//! presence_timeout_secs = 15
//! user_log_limit = 80
//!
//! [logging]
//! level = "info"
//! file = "wildgrid.log"
//! ```
//!
//! Every field in `[world]` has a default, so a file containing only
//! `[world]` and `[logging]` headers is valid. Leaving `catalog_path` unset
//! uses the built-in catalog.
//!
//! ```rust,no_run
//! use wildgrid::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("config.toml").await?;
//!     let config = Config::load("config.toml").await?;
//!     println!("world data in {}", config.world.data_dir);
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::world::active::DEFAULT_ACTIVE_TTL_SECS;
use crate::world::storage::{DEFAULT_PRESENCE_TIMEOUT_SECS, DEFAULT_USER_LOG_LIMIT};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<String>,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_active_ttl_secs")]
    pub active_ttl_secs: i64,
    #[serde(default = "default_presence_timeout_secs")]
    pub presence_timeout_secs: i64,
    #[serde(default = "default_user_log_limit")]
    pub user_log_limit: usize,
}

fn default_data_dir() -> String {
    "./data/world".to_string()
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_active_ttl_secs() -> i64 {
    DEFAULT_ACTIVE_TTL_SECS
}

fn default_presence_timeout_secs() -> i64 {
    DEFAULT_PRESENCE_TIMEOUT_SECS
}

fn default_user_log_limit() -> usize {
    DEFAULT_USER_LOG_LIMIT
}

impl WorldConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            catalog_path: None,
            tick_interval_ms: default_tick_interval_ms(),
            active_ttl_secs: default_active_ttl_secs(),
            presence_timeout_secs: default_presence_timeout_secs(),
            user_log_limit: default_user_log_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("wildgrid.log".to_string()),
        }
    }
}

impl LoggingConfig {
    /// Configured level, falling back to `Info` for unrecognised names.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            world: WorldConfig {
                catalog_path: Some("./data/catalog.json".to_string()),
                ..WorldConfig::default()
            },
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_world_fields_take_defaults() {
        let config: Config = toml::from_str("[world]\ndata_dir = \"/srv/world\"\n").unwrap();
        assert_eq!(config.world.data_dir, "/srv/world");
        assert_eq!(config.world.active_ttl_secs, 10);
        assert_eq!(config.world.presence_timeout_secs, 15);
        assert_eq!(config.world.user_log_limit, 80);
        assert_eq!(config.world.tick_interval(), Duration::from_secs(1));
        assert!(config.world.catalog_path.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn level_filter_parses_case_insensitively() {
        let logging = LoggingConfig {
            level: "DEBUG".into(),
            file: None,
        };
        assert_eq!(logging.level_filter(), log::LevelFilter::Debug);
        let logging = LoggingConfig {
            level: "loud".into(),
            file: None,
        };
        assert_eq!(logging.level_filter(), log::LevelFilter::Info);
    }

    #[tokio::test]
    async fn default_file_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let config = Config::load(path).await.unwrap();
        assert_eq!(config.world.data_dir, "./data/world");
        assert_eq!(
            config.world.catalog_path.as_deref(),
            Some("./data/catalog.json")
        );
        assert_eq!(config.logging.file.as_deref(), Some("wildgrid.log"));
    }

    #[tokio::test]
    async fn load_reports_missing_file() {
        let err = Config::load("/definitely/not/here.toml").await.unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
