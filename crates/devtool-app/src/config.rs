//! Application configuration.
//!
//! Stored as JSON at `<config dir>/config.json`. A missing file yields the
//! defaults; unknown or missing keys fall back to their defaults as well.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use devtool_proxy::{
    default_resource_dir, ControlClient, ControlError, SupervisorConfig, DEFAULT_API_PORT,
    DEFAULT_HOST, DEFAULT_PROXY_PORT,
};

/// File name of the configuration inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Errors reading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File system error.
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid configuration JSON.
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    /// No platform configuration directory could be determined.
    #[error("no configuration directory available")]
    NoConfigDir,
}

/// Persistent settings for the `devtool` binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Control-plane host.
    pub host: String,
    /// Control API port.
    pub api_port: u16,
    /// Intercepting listener port.
    pub proxy_port: u16,
    /// Directory holding the proxy binary; `None` uses the executable's directory.
    pub resource_dir: Option<PathBuf>,
    /// Per-request timeout for control-plane calls.
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            api_port: DEFAULT_API_PORT,
            proxy_port: DEFAULT_PROXY_PORT,
            resource_dir: None,
            request_timeout_secs: 10,
        }
    }
}

/// Get the configuration directory path.
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "devtool", "DevTool").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the default configuration file path.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

impl AppConfig {
    /// Loads the configuration from `path`, or defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Loads from the platform config directory.
    pub fn load_default() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Writes the configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Writes to the platform config directory.
    pub fn save_default(&self) -> Result<PathBuf, ConfigError> {
        let path = default_config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save(&path)?;
        Ok(path)
    }

    /// Writes to `path`, or to the platform config directory when `None`.
    pub fn save_to(&self, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
        match path {
            Some(path) => {
                self.save(path)?;
                Ok(path.to_path_buf())
            }
            None => self.save_default(),
        }
    }

    /// Per-request timeout, never zero.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Supervisor settings binding both listeners on all interfaces.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        let dir = self
            .resource_dir
            .clone()
            .or_else(default_resource_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        SupervisorConfig::new(dir)
            .with_proxy_port(self.proxy_port)
            .with_api_port(self.api_port)
    }

    /// Control-plane client for the configured host and port.
    pub fn control_client(&self) -> Result<ControlClient, ControlError> {
        ControlClient::with_timeout(&self.host, self.api_port, self.request_timeout())
    }
}
