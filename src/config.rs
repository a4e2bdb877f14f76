//! Broker policy constants and the optional TOML config file.
//!
//! Precedence for the binary: CLI flags, then `config.toml`, then the
//! defaults in [`BrokerConfig::default`].

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

/// Default cap on simultaneously in-flight requests.
pub const DEFAULT_MAX_CONCURRENT: usize = 20;
/// Minimum accepted concurrency.
pub const MIN_CONCURRENT: usize = 1;
/// Maximum accepted concurrency.
pub const MAX_CONCURRENT: usize = 100;
/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Default connect timeout for the HTTP client.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of 301 hops followed before giving up.
pub const DEFAULT_MAX_REDIRECT_HOPS: u32 = 5;
/// Default API root.
pub const DEFAULT_API_BASE_URL: &str = "https://api.nexusmods.com/v1";
/// Value of the `Protocol-Version` header.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Errors from building or loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "invalid max_concurrent value {value}: must be between {MIN_CONCURRENT} and {MAX_CONCURRENT}"
    )]
    InvalidConcurrency { value: usize },

    #[error("invalid {field}: must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("invalid api_base_url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Policy constants for one broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub max_concurrent: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_redirect_hops: u32,
    pub api_base_url: String,
    pub protocol_version: String,
    pub application_name: String,
    pub application_version: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_redirect_hops: DEFAULT_MAX_REDIRECT_HOPS,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            application_name: "modrepo".to_string(),
            application_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl BrokerConfig {
    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CONCURRENT..=MAX_CONCURRENT).contains(&self.max_concurrent) {
            return Err(ConfigError::InvalidConcurrency {
                value: self.max_concurrent,
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "request_timeout",
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "connect_timeout",
            });
        }
        match url::Url::parse(&self.api_base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
            Ok(url) => Err(ConfigError::InvalidBaseUrl {
                url: self.api_base_url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            }),
            Err(e) => Err(ConfigError::InvalidBaseUrl {
                url: self.api_base_url.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub max_concurrent: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub max_redirect_hops: Option<u32>,
    pub api_base_url: Option<String>,
    pub application_name: Option<String>,
    pub application_version: Option<String>,
    /// Netscape cookie export seeding the session jar.
    pub cookies_file: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

impl FileConfig {
    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on syntax errors or unknown keys.
    pub fn from_toml(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlays the values present in the file onto `config`.
    pub fn apply_to(&self, config: &mut BrokerConfig) {
        if let Some(value) = self.max_concurrent {
            config.max_concurrent = value;
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(hops) = self.max_redirect_hops {
            config.max_redirect_hops = hops;
        }
        if let Some(url) = &self.api_base_url {
            config.api_base_url.clone_from(url);
        }
        if let Some(name) = &self.application_name {
            config.application_name.clone_from(name);
        }
        if let Some(version) = &self.application_version {
            config.application_version.clone_from(version);
        }
    }
}

/// Result of looking for the default config file.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Where the file was looked for, if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed contents when the file exists.
    pub config: Option<FileConfig>,
}

/// Resolves the default config path.
///
/// 1. `$XDG_CONFIG_HOME/modrepo/config.toml`
/// 2. `$HOME/.config/modrepo/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg).join("modrepo").join("config.toml"));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("modrepo")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    env::var_os(name).filter(|value| !value.is_empty())
}

/// Loads the config file from the default path, if one exists.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file exists but cannot be read or parsed.
pub fn load_default_file_config() -> Result<LoadedConfig, ConfigError> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(p) if p.exists() => Some(load_file_config(p)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

/// Loads and parses the config file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = FileConfig::from_toml(&raw, path)?;
    debug!(path = %path.display(), "loaded config file");
    Ok(config)
}
