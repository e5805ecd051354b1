//! Configuration loading and default path resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Steps 1 and 2 are handled by the binary's argument parser and arrive here
//! as [`SettingsOverrides`]. A missing config file is not an error.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "FEEDMUX_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Listen address for the bus, e.g. "127.0.0.1:5790"
    #[serde(default)]
    pub bind: Option<String>,

    /// Per-user cache directory (cache files, ban list, thumbnails)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// View refresh interval in seconds
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,

    /// Event bus capacity per view
    #[serde(default)]
    pub event_capacity: Option<usize>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default)]
    pub level: Option<String>,
}

/// Compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub bind: String,
    pub cache_dir: PathBuf,
    pub refresh_interval: Duration,
    pub event_capacity: usize,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            bind: "127.0.0.1:5790".to_string(),
            cache_dir: default_cache_dir(),
            refresh_interval: Duration::from_secs(300),
            event_capacity: 1000,
            log_level: "info".to_string(),
        }
    }
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub bind: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub refresh_interval_secs: Option<u64>,
    pub log_level: Option<String>,
}

/// Fully resolved daemon settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: String,
    pub cache_dir: PathBuf,
    pub refresh_interval: Duration,
    pub event_capacity: usize,
    pub log_level: String,
}

impl Settings {
    /// Merge overrides, the TOML file and compiled defaults
    pub fn resolve(overrides: SettingsOverrides, toml: Option<TomlConfig>) -> Result<Self> {
        let defaults = CompiledDefaults::for_current_platform();
        let toml = toml.unwrap_or_default();

        let refresh_secs = overrides
            .refresh_interval_secs
            .or(toml.refresh_interval_secs);
        let refresh_interval = match refresh_secs {
            Some(0) => {
                return Err(Error::Config(
                    "refresh_interval_secs must be greater than zero".to_string(),
                ))
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.refresh_interval,
        };

        Ok(Self {
            bind: overrides.bind.or(toml.bind).unwrap_or(defaults.bind),
            cache_dir: overrides
                .cache_dir
                .or(toml.cache_dir)
                .unwrap_or(defaults.cache_dir),
            refresh_interval,
            event_capacity: toml.event_capacity.unwrap_or(defaults.event_capacity),
            log_level: overrides
                .log_level
                .or(toml.logging.level)
                .unwrap_or(defaults.log_level),
        })
    }

    /// Directory holding one JSON file per cache key
    pub fn result_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("cache")
    }

    /// Directory holding downloaded avatars and thumbnails
    pub fn thumbnail_dir(&self) -> PathBuf {
        self.cache_dir.join("thumbnails")
    }

    /// Newline-delimited ban list
    pub fn ban_list_path(&self) -> PathBuf {
        self.cache_dir.join("banned.txt")
    }
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str::<TomlConfig>(&content)?;
    Ok(config)
}

/// Locate and parse the config file, if there is one
///
/// Lookup order: `$FEEDMUX_CONFIG`, `~/.config/feedmux/config.toml`,
/// `/etc/feedmux/config.toml`. Parse failures are reported; absence is not.
pub fn load_default_config() -> Result<Option<TomlConfig>> {
    match find_config_file() {
        Some(path) => {
            debug!("Loading config file {}", path.display());
            load_toml_config(&path).map(Some)
        }
        None => {
            debug!("No config file found, using defaults");
            Ok(None)
        }
    }
}

fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        warn!("{} points to missing file {}", CONFIG_ENV_VAR, path.display());
    }

    let user_config = dirs::config_dir().map(|d| d.join("feedmux").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/feedmux/config.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Per-user cache directory (`~/.cache/feedmux` on Linux)
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("feedmux"))
        .unwrap_or_else(|| PathBuf::from("./feedmux_cache"))
}
