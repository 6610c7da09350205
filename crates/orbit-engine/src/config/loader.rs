use super::schema::OrbitConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./orbit.yaml
    /// 2. ~/.orbit/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<OrbitConfig, ConfigError> {
        let local_config = PathBuf::from("./orbit.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".orbit").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        Ok(OrbitConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<OrbitConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: OrbitConfig = serde_yaml::from_str(&content)?;
        config.validate().map_err(ConfigError::Invalid)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}
