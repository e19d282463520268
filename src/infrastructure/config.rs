use crate::domain::{
    config::SercomConfig,
    error::{SercomError, SercomResult},
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration manager
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Manager for the per-user configuration file
    pub fn new() -> SercomResult<Self> {
        Ok(Self {
            config_path: Self::default_config_path()?,
        })
    }

    /// Manager for an explicit configuration file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    /// Load configuration, falling back to defaults when the file is missing
    pub fn load_config(&self) -> SercomResult<SercomConfig> {
        if !self.config_path.exists() {
            debug!(
                "No config file at {}; using defaults",
                self.config_path.display()
            );
            return Ok(SercomConfig::default());
        }

        self.load_config_from_path(&self.config_path)
    }

    /// Save configuration, creating the parent directory if needed
    pub fn save_config(&self, config: &SercomConfig) -> SercomResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| SercomError::Config {
                message: format!("Failed to create config directory: {}", e),
            })?;
        }

        self.save_config_to_path(&self.config_path, config)
    }

    /// Get per-user configuration path
    fn default_config_path() -> SercomResult<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| SercomError::Config {
            message: "Could not determine home directory".to_string(),
        })?;

        Ok(home.join(".config").join("sercom").join("config.toml"))
    }

    /// Load configuration from specific path
    pub fn load_config_from_path(&self, path: &Path) -> SercomResult<SercomConfig> {
        let content = fs::read_to_string(path).map_err(|e| SercomError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| SercomError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    }

    /// Save configuration to specific path
    pub fn save_config_to_path(&self, path: &Path, config: &SercomConfig) -> SercomResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| SercomError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| SercomError::Config {
            message: format!("Failed to write config file {}: {}", path.display(), e),
        })
    }

    /// Write a default configuration file to `path`.
    ///
    /// Refuses to overwrite an existing file unless `force` is set.
    pub fn init_config(&self, path: &Path, force: bool) -> SercomResult<()> {
        if path.exists() && !force {
            return Err(SercomError::Config {
                message: format!(
                    "Configuration already exists at {} (use --force to overwrite)",
                    path.display()
                ),
            });
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SercomError::Config {
                message: format!("Failed to create config directory: {}", e),
            })?;
        }

        self.save_config_to_path(path, &SercomConfig::default())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}
