//! Configuration handling for vpn-conductor

use crate::catalog::Tier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const LOCAL_CONFIG_FILE: &str = "vpn-conductor.toml";
const APP_DIR: &str = "vpn-conductor";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub recents: RecentsConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    pub tier: Tier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// JSON server list used by the bundled catalog source
    pub path: PathBuf,
    pub refresh_interval_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("servers.json"),
            refresh_interval_secs: 15 * 60,
        }
    }
}

impl CatalogConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentsConfig {
    pub capacity: usize,
}

impl Default for RecentsConfig {
    fn default() -> Self {
        Self {
            capacity: crate::profile::DEFAULT_RECENTS_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    pub secure_core: bool,
    pub display_streaming_logos: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            secure_core: false,
            display_streaming_logos: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for profiles and recents; platform data dir when unset
    pub dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
        })
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load config from the first location that exists
    ///
    /// Order: `./vpn-conductor.toml`, then `<config_dir>/vpn-conductor/config.toml`.
    pub fn discover() -> Result<Self, ConfigError> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Self::load(&local);
        }

        if let Some(dir) = dirs::config_dir() {
            let user_config = dir.join(APP_DIR).join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        info!("No config file found, using defaults");
        Ok(Config::default())
    }

    pub fn local_path() -> PathBuf {
        PathBuf::from(LOCAL_CONFIG_FILE)
    }
}
