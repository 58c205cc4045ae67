//! Postbox configuration file handling
//!
//! Loads and manages the ~/.config/postbox/config.yaml file.

use crate::queue::DEFAULT_MAX_ATTEMPTS;
use crate::settings::TransportSettings;
use crate::worker::WorkerConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Postbox configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostboxConfig {
    /// SQLite file holding the queue and saved transport settings
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Attempt cap for messages enqueued without one
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    /// Worker tuning
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Fixed relay settings; when absent the active row in the database is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportSettings>,
}

fn default_database() -> PathBuf {
    // Always use ~/.config for consistency across platforms (macOS, Linux)
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("postbox");
    path.push("queue.db");
    path
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl PostboxConfig {
    pub fn new() -> Self {
        Self {
            database: default_database(),
            default_max_attempts: default_max_attempts(),
            worker: WorkerConfig::default(),
            transport: None,
        }
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::PostboxError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading postbox configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            database = %config.database.display(),
            batch_size = config.worker.batch_size,
            static_transport = config.transport.is_some(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Load a config file, falling back to defaults when it does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::new())
        }
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving postbox configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/postbox/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("postbox");
        path.push("config.yaml");
        path
    }
}

impl Default for PostboxConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Serde helpers for `Duration` fields stored as whole seconds
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
