use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

const APP_DIR: &str = "rss-aggregator";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Knobs for fetching and scheduling feed refreshes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_base_interval_minutes")]
    pub base_interval_minutes: u64,

    #[serde(default = "default_max_interval_hours")]
    pub max_interval_hours: u64,

    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_jitter_min_percent")]
    pub jitter_min_percent: u32,

    #[serde(default = "default_jitter_max_percent")]
    pub jitter_max_percent: u32,

    #[serde(default = "default_item_cap")]
    pub item_cap: usize,

    #[serde(default = "default_error_max_chars")]
    pub error_max_chars: usize,

    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Housekeeping of read items and expired tombstones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_interval_minutes")]
    pub interval_minutes: u64,

    #[serde(default = "default_read_retention_minutes")]
    pub read_retention_minutes: u64,

    #[serde(default = "default_tombstone_retention_days")]
    pub tombstone_retention_days: u64,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("feeds.db").to_string_lossy().to_string()
}

fn default_base_interval_minutes() -> u64 {
    20
}

fn default_max_interval_hours() -> u64 {
    12
}

fn default_tick_seconds() -> u64 {
    30
}

fn default_batch_size() -> usize {
    5
}

fn default_jitter_min_percent() -> u32 {
    10
}

fn default_jitter_max_percent() -> u32 {
    20
}

fn default_item_cap() -> usize {
    200
}

fn default_error_max_chars() -> usize {
    300
}

fn default_request_timeout_seconds() -> u64 {
    15
}

fn default_user_agent() -> String {
    format!("rss-aggregator/{} (+self-hosted feed reader)", env!("CARGO_PKG_VERSION"))
}

fn default_cleanup_interval_minutes() -> u64 {
    60
}

fn default_read_retention_minutes() -> u64 {
    120
}

fn default_tombstone_retention_days() -> u64 {
    30
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            base_interval_minutes: default_base_interval_minutes(),
            max_interval_hours: default_max_interval_hours(),
            tick_seconds: default_tick_seconds(),
            batch_size: default_batch_size(),
            jitter_min_percent: default_jitter_min_percent(),
            jitter_max_percent: default_jitter_max_percent(),
            item_cap: default_item_cap(),
            error_max_chars: default_error_max_chars(),
            request_timeout_seconds: default_request_timeout_seconds(),
            user_agent: default_user_agent(),
        }
    }
}

impl RefreshConfig {
    pub fn base_interval(&self) -> Duration {
        Duration::from_secs(self.base_interval_minutes * 60)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_hours * 60 * 60)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_cleanup_interval_minutes(),
            read_retention_minutes: default_read_retention_minutes(),
            tombstone_retention_days: default_tombstone_retention_days(),
        }
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub fn read_retention(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.read_retention_minutes as i64)
    }

    pub fn tombstone_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.tombstone_retention_days as i64)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            refresh: RefreshConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        let refresh = &self.refresh;
        if refresh.tick_seconds == 0 {
            return Err(AppError::Config("refresh.tick_seconds must be positive".into()));
        }
        if refresh.batch_size == 0 {
            return Err(AppError::Config("refresh.batch_size must be positive".into()));
        }
        if refresh.base_interval_minutes == 0 {
            return Err(AppError::Config(
                "refresh.base_interval_minutes must be positive".into(),
            ));
        }
        if refresh.max_interval() < refresh.base_interval() {
            return Err(AppError::Config(
                "refresh.max_interval_hours is shorter than the base interval".into(),
            ));
        }
        if refresh.jitter_min_percent > refresh.jitter_max_percent {
            return Err(AppError::Config(format!(
                "jitter band is inverted: {}% > {}%",
                refresh.jitter_min_percent, refresh.jitter_max_percent
            )));
        }
        if refresh.jitter_max_percent >= 100 {
            return Err(AppError::Config(
                "refresh.jitter_max_percent must be below 100".into(),
            ));
        }
        if refresh.item_cap == 0 {
            return Err(AppError::Config("refresh.item_cap must be positive".into()));
        }
        if self.cleanup.interval_minutes == 0 {
            return Err(AppError::Config("cleanup.interval_minutes must be positive".into()));
        }
        Ok(())
    }
}
