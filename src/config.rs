//! Client configuration.
//!
//! The client only needs to know where the payment API lives and where to
//! keep its local data (the persisted auth blob).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the payment API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Local data directory (for the persisted auth blob).
    #[serde(skip)]
    pub data_dir: Option<PathBuf>,
}

fn default_api_base() -> String {
    "http://localhost:8080".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            data_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from disk, creating a default file on first run.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            log::info!("📁 Loading config from: {}", config_path.display());
            let contents = fs::read_to_string(&config_path)?;
            let mut config: Config = toml::from_str(&contents)?;
            config.data_dir = Some(Self::default_data_dir()?);
            log::info!("✅ Config loaded: api_base={}", config.api_base);
            Ok(config)
        } else {
            log::info!("📝 Creating default config");
            let config = Config {
                data_dir: Some(Self::default_data_dir()?),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(&config_path, contents)?;
        log::info!("💾 Config saved to: {}", config_path.display());
        Ok(())
    }

    /// Where the persisted auth blob lives.
    pub fn auth_blob_path(&self) -> PathBuf {
        let mut path = self
            .data_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().unwrap_or_else(|_| PathBuf::from(".")));
        path.push("auth.json");
        path
    }

    fn config_path() -> Result<PathBuf, ConfigError> {
        let mut path = Self::default_data_dir()?;
        path.push("config.toml");
        Ok(path)
    }

    pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        let mut path = home;
        path.push(".tuition-client");
        Ok(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(ConfigError::InvalidEndpoint(self.api_base.clone()));
        }
        Ok(())
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Home directory not found")]
    NoHomeDir,

    #[error("Invalid endpoint: {0} (must start with http:// or https://)")]
    InvalidEndpoint(String),
}
