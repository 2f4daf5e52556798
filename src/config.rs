use crate::core::db::ConnectionConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable that overrides the default configuration path.
pub const CONFIG_ENV_VAR: &str = "DBGATE_CONFIG";

/// Errors raised while loading a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Parameters handed to the gateway unchanged
    pub connection: ConnectionConfig,
    pub logging: Option<LoggingConfig>,
}

/// Logging-related configuration.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: Option<String>,
}

impl AppConfig {
    /// Configured log level, if any
    pub fn log_level(&self) -> Option<&str> {
        self.logging.as_ref()?.level.as_deref()
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = dbgate::config::load_config("config.toml").expect("Failed to load config");
/// let gateway = dbgate::Gateway::new(config.connection);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Parses configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Where the configuration is read from when no path is given:
/// `$DBGATE_CONFIG`, else `<config dir>/dbgate/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("dbgate").join("config.toml"))
}
