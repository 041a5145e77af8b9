//! Cache configuration
//!
//! `CacheConfig` carries the defaults a `DataCache` applies to every resolve.
//! It can be loaded from an optional TOML file, by default
//! `~/.config/swrcache/config.toml` on Linux.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::cache::MAX_TTL;

/// Default time-to-live for cached values (5 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// TTL outside 1..=MAX_TTL seconds
    #[error("ttl_secs must be between 1 and {}", MAX_TTL.as_secs())]
    InvalidTtl,

    /// Capacity must be positive
    #[error("max_entries must be greater than zero")]
    InvalidCapacity,
}

/// Raw config file contents; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Default TTL in seconds
    pub ttl_secs: Option<u64>,
    /// Serve stale values while refreshing
    pub stale_while_revalidate: Option<bool>,
    /// Upper bound on cached keys
    pub max_entries: Option<usize>,
    /// Share one producer call between concurrent resolves of a key
    pub dedupe_in_flight: Option<bool>,
}

/// Settings applied by a `DataCache`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL used when a resolve does not override it
    pub default_ttl: Duration,
    /// Whether expired values are served while a refresh runs
    pub stale_while_revalidate: bool,
    /// Maximum number of keys, `None` for unbounded
    pub max_entries: Option<usize>,
    /// Whether concurrent resolves of the same key share a producer call
    pub dedupe_in_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            stale_while_revalidate: true,
            max_entries: None,
            dedupe_in_flight: false,
        }
    }
}

impl TryFrom<ConfigFile> for CacheConfig {
    type Error = ConfigError;

    fn try_from(file: ConfigFile) -> Result<Self, Self::Error> {
        let defaults = CacheConfig::default();

        let default_ttl = match file.ttl_secs {
            Some(secs) if secs == 0 || secs > MAX_TTL.as_secs() => {
                return Err(ConfigError::InvalidTtl)
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.default_ttl,
        };
        if file.max_entries == Some(0) {
            return Err(ConfigError::InvalidCapacity);
        }

        Ok(Self {
            default_ttl,
            stale_while_revalidate: file
                .stale_while_revalidate
                .unwrap_or(defaults.stale_while_revalidate),
            max_entries: file.max_entries,
            dedupe_in_flight: file.dedupe_in_flight.unwrap_or(defaults.dedupe_in_flight),
        })
    }
}

impl CacheConfig {
    /// Returns the XDG config file path, if a home directory is known
    pub fn default_path() -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "swrcache")?;
        Some(project_dirs.config_dir().join("config.toml"))
    }

    /// Loads configuration
    ///
    /// An explicit `path` must exist. Without one, the default path is read
    /// if present and defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => {
                    tracing::debug!("no config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    /// Reads and validates a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let config = CacheConfig::try_from(file)?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(config)
    }
}
