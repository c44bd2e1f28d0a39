//! Application configuration management.
//!
//! Configuration is stored at `~/.config/devbytes/config.json`. Every field
//! is optional; accessors fall back to defaults. `DEVBYTES_BASE_URL` and
//! `DEVBYTES_DATA_DIR` override the file when set.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::jobs::RetryPolicy;

/// Application name used for config/data directory paths
const APP_NAME: &str = "devbytes";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Database file name inside the data directory
const DATABASE_FILE: &str = "devbytes.db";

/// Job registry file name inside the data directory
const JOBS_FILE: &str = "jobs.json";

const DEFAULT_BASE_URL: &str = "https://android-kotlin-fun-mars-server.appspot.com";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const ENV_BASE_URL: &str = "DEVBYTES_BASE_URL";
const ENV_DATA_DIR: &str = "DEVBYTES_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub data_dir: Option<PathBuf>,
    pub retry_initial_delay_secs: Option<u64>,
    pub retry_max_delay_secs: Option<u64>,
    pub retry_max_attempts: Option<u32>,
}

impl Config {
    /// Load the config file (if any), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    fn apply_env(&mut self) {
        if let Some(url) = std::env::var(ENV_BASE_URL).ok().filter(|v| !v.is_empty()) {
            self.base_url = Some(url);
        }
        if let Some(dir) = std::env::var_os(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(DATABASE_FILE))
    }

    pub fn jobs_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(JOBS_FILE))
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("logs"))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            initial_delay: self
                .retry_initial_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.initial_delay),
            max_delay: self
                .retry_max_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_delay),
            max_attempts: self.retry_max_attempts.unwrap_or(defaults.max_attempts),
        }
    }
}
