use std::path::{Path, PathBuf};

use parley_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CONFIG_FILE: &str = "config.yml";
const DATABASE_FILE: &str = "parley.db";

/// Reads `AppConfig` from YAML and applies `PARLEY_*` environment overrides.
pub struct ConfigLoader;

impl ConfigLoader {
    /// `~/.parley`, or `./.parley` when no home directory is known.
    pub fn default_config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".parley")
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(CONFIG_FILE)
    }

    /// Load configuration from `path` (or the default location), then apply
    /// overrides from the process environment.
    pub fn load(path: Option<&Path>) -> Result<AppConfig> {
        let config = Self::load_file(path)?;
        Ok(Self::apply_env_overrides(config, |key| std::env::var(key).ok()))
    }

    /// Load the YAML file only. A missing file yields the defaults.
    pub fn load_file(path: Option<&Path>) -> Result<AppConfig> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        if !path.exists() {
            debug!("no config file at {}, using defaults", path.display());
            return Ok(AppConfig::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        let config: AppConfig = serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn apply_env_overrides<F>(mut config: AppConfig, lookup: F) -> AppConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PARLEY_HOST").filter(|v| !v.trim().is_empty()) {
            config.gateway.host = host.trim().to_string();
        }
        if let Some(port) = lookup("PARLEY_PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
            config.gateway.port = port;
        }
        if let Some(db) = lookup("PARLEY_DATABASE").filter(|v| !v.trim().is_empty()) {
            config.database.path = Some(PathBuf::from(db.trim()));
        }
        config
    }

    /// Resolve the database file, expanding a leading `~/`.
    pub fn database_path(config: &AppConfig) -> PathBuf {
        match &config.database.path {
            Some(path) => expand_home(path),
            None => Self::default_config_dir().join(DATABASE_FILE),
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
