//! TOML settings with defaults matching a stock deployment; every field is
//! optional in the file.

use crate::error::ConfigError;
use crate::ingest::IngestSettings;
use crate::retention::RetentionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Settings {
    /// Name of the channel both processes agree on.
    pub channel_name: String,
    pub connect_timeout_ms: u64,
    pub reconnect_backoff_secs: u64,
    pub volume_label_prefix: String,
    pub device_subpath: PathBuf,
    pub holding_dir: PathBuf,
    pub cooldown_seconds: u64,
    pub allowed_extensions: Vec<String>,
    pub retention_days: u64,
    pub settle_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            channel_name: "MediaMinder_Pipe".to_string(),
            connect_timeout_ms: 5000,
            reconnect_backoff_secs: 5,
            volume_label_prefix: "Canon G16".to_string(),
            device_subpath: PathBuf::from("DCIM"),
            holding_dir: default_holding_dir(),
            cooldown_seconds: 30,
            allowed_extensions: [
                ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".raw", ".cr2", ".arw",
                ".nef", ".dng",
            ]
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
            retention_days: 7,
            settle_delay_ms: 1000,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.to_path_buf(),
            source: err,
        })?;
        toml::from_str(&raw).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            source: err,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            volume_label_prefix: self.volume_label_prefix.clone(),
            device_subpath: self.device_subpath.clone(),
            holding_dir: self.holding_dir.clone(),
            cooldown: self.cooldown(),
            allowed_extensions: self.allowed_extensions.clone(),
        }
    }

    pub fn retention_config(&self) -> RetentionConfig {
        RetentionConfig {
            holding_dir: self.holding_dir.clone(),
            allowed_extensions: self.allowed_extensions.clone(),
            retention: self.retention(),
        }
    }
}

fn default_holding_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("MediaMinder")
        .join("Holding")
}
