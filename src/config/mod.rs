//! Application settings, loaded from TOML.
//!
//! ```toml
//! root = "./service"
//! mount_path = "/api/v1"
//! hostname = "0.0.0.0"
//! port = 8080
//! ```
//!
//! Only `root` is required. Code-level options (root middleware, the module
//! registry, the shutdown callback) live on [`AppBuilder`](crate::app::AppBuilder).

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while reading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Where to find the route tree and where to listen.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Application root; routes are discovered under `<root>/api`.
    pub root: PathBuf,
    /// Prefix prepended to every route, e.g. `/api/v1`.
    #[serde(default)]
    pub mount_path: Option<String>,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_hostname() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    3000
}

impl AppConfig {
    /// Settings for `root` with every other field at its default.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mount_path: None,
            hostname: default_hostname(),
            port: default_port(),
        }
    }

    /// Reads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates TOML text.
    ///
    /// ```
    /// use treeroute::config::AppConfig;
    ///
    /// let config = AppConfig::from_toml_str(r#"root = "svc""#).unwrap();
    /// assert_eq!(config.port, 3000);
    /// assert_eq!(config.address(), "127.0.0.1:3000");
    /// ```
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(mount_path) = &self.mount_path {
            validate_mount_path(mount_path)?;
        }
        if self.hostname.trim().is_empty() {
            return Err(ConfigError::Invalid("hostname must not be empty".into()));
        }
        Ok(())
    }

    /// `hostname:port`, as passed to the listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// A mount path must start with `/` and must not contain empty segments.
/// A single trailing `/` is tolerated.
pub fn validate_mount_path(mount_path: &str) -> Result<(), ConfigError> {
    let Some(rest) = mount_path.strip_prefix('/') else {
        return Err(ConfigError::Invalid(format!(
            "mount path {mount_path:?} must start with '/'"
        )));
    };
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    if !rest.is_empty() && rest.split('/').any(str::is_empty) {
        return Err(ConfigError::Invalid(format!(
            "mount path {mount_path:?} contains an empty segment"
        )));
    }
    Ok(())
}
