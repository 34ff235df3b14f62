use crate::collector::CollectOptions;
use crate::database::Database;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CHANNEL_ENV: &str = "DEFAULT_CHANNEL_ID";
const APP_DIR: &str = "channel-analytics";
const DB_FILE: &str = "channel_analytics.db";

/// Contents of `config.yaml`. Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Store location; defaults to the user data directory.
    pub database_path: Option<PathBuf>,
    pub default_channel_id: Option<String>,
    pub patterns_path: PathBuf,
    pub collection: CollectOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            default_channel_id: None,
            patterns_path: PathBuf::from("show_patterns.yaml"),
            collection: CollectOptions::default(),
        }
    }
}

impl AppConfig {
    /// Read the config file if it exists, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                AppError::Config(format!("Failed to read config {}: {}", path.display(), e))
            })?;
            Self::from_yaml(&content)?
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, AppError> {
        // An empty file deserializes to null.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| AppError::Config(format!("Invalid YAML in config: {}", e)))
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(channel) = lookup(DEFAULT_CHANNEL_ENV).filter(|v| !v.trim().is_empty()) {
            self.default_channel_id = Some(channel.trim().to_string());
        }
    }

    pub fn database_path(&self) -> Result<PathBuf, AppError> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| AppError::Config("Failed to get user data directory".into()))?;
        Ok(data_dir.join(APP_DIR).join(DB_FILE))
    }

    /// Channel to operate on: the explicit one, else the configured default.
    pub fn channel_id(&self, explicit: Option<&str>) -> Result<String, AppError> {
        explicit
            .map(str::to_string)
            .or_else(|| self.default_channel_id.clone())
            .ok_or_else(|| {
                AppError::Config(format!(
                    "No channel id given and {} is not set",
                    DEFAULT_CHANNEL_ENV
                ))
            })
    }

    /// Open the store, creating its directory on first use.
    pub fn open_database(&self) -> Result<Database, AppError> {
        let path = self.database_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        log::info!("Opening store at {}", path.display());
        Ok(Database::new(&path)?)
    }
}
