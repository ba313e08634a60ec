//! Configuration loading and stations root resolution
//!
//! Bootstrap configuration lives in a small TOML file. Every setting has a
//! built-in default, so a missing file is a warning rather than a failure.
//!
//! # Stations Root Priority
//!
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`ARCHIVE_STATIONS_ROOT`)
//! 3. TOML config file (`stations_root`)
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Directory name used under the platform config directory
pub const CONFIG_DIR_NAME: &str = "station-archive";

/// Environment variable overriding the stations root
pub const STATIONS_ROOT_ENV: &str = "ARCHIVE_STATIONS_ROOT";

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change during runtime. The service must restart
/// to pick up changes to the TOML file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Directory holding one archive folder per station (optional)
    #[serde(default)]
    pub stations_root: Option<PathBuf>,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Chunked transfer configuration
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Directory walk bounds
    #[serde(default)]
    pub traversal: TraversalConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            stations_root: None,
            port: default_port(),
            logging: LoggingConfig::default(),
            streaming: StreamingConfig::default(),
            traversal: TraversalConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Chunked transfer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// Characters of base64 text per chunk event
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Sessions idle longer than this are evicted by the reaper
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// How often the reaper scans the session table
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,

    /// Largest encoded payload accepted by a single-shot upload call
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl StreamingConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            idle_timeout_secs: default_idle_timeout_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Bounds applied to every walk over an archive tree
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TraversalConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_nodes: default_max_nodes(),
        }
    }
}

fn default_port() -> u16 {
    5730
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_chunk_size() -> usize {
    16_000
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_reap_interval_secs() -> u64 {
    30
}

fn default_max_upload_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_max_depth() -> usize {
    32
}

fn default_max_nodes() -> usize {
    10_000
}

/// Load the bootstrap TOML configuration
///
/// With an explicit path, read errors and parse errors are fatal.
/// Without one, the platform config locations are searched; if no file is
/// found the built-in defaults are used and a warning is logged.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match find_config_file() {
            Some(path) => path,
            None => {
                warn!("No config file found, using built-in defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse TOML {:?}: {}", path, e)))?;

    info!("Loaded TOML configuration from {:?}", path);
    Ok(config)
}

/// Locate the config file for the platform
///
/// Tries `<config_dir>/station-archive/config.toml` first, then
/// `/etc/station-archive/config.toml` on Linux.
pub fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(CONFIG_DIR_NAME).join("config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Where the resolved stations root came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSource {
    CommandLine,
    Environment,
    ConfigFile,
    CompiledDefault,
}

/// Stations root resolution following the 4-tier priority order
pub struct StationsRootResolver<'a> {
    cli_arg: Option<&'a Path>,
    toml_config: &'a TomlConfig,
}

impl<'a> StationsRootResolver<'a> {
    pub fn new(cli_arg: Option<&'a Path>, toml_config: &'a TomlConfig) -> Self {
        Self {
            cli_arg,
            toml_config,
        }
    }

    /// Resolve the stations root and report which tier supplied it
    pub fn resolve(&self) -> (PathBuf, RootSource) {
        // Priority 1: Command-line argument
        if let Some(path) = self.cli_arg {
            return (path.to_path_buf(), RootSource::CommandLine);
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(STATIONS_ROOT_ENV) {
            if !path.trim().is_empty() {
                return (PathBuf::from(path), RootSource::Environment);
            }
        }

        // Priority 3: TOML config file
        if let Some(path) = &self.toml_config.stations_root {
            return (path.clone(), RootSource::ConfigFile);
        }

        // Priority 4: OS-dependent compiled default
        (default_stations_root(), RootSource::CompiledDefault)
    }
}

/// Get OS-dependent default stations root
///
/// `<Documents>/Stations`, falling back to the home directory and finally
/// the working directory.
pub fn default_stations_root() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .map(|d| d.join("Stations"))
        .unwrap_or_else(|| PathBuf::from("./Stations"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.port, 5730);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.streaming.chunk_size, 16_000);
        assert_eq!(config.traversal.max_depth, 32);
        assert!(config.stations_root.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            port = 6000
            [streaming]
            chunk_size = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.streaming.chunk_size, 4096);
        assert_eq!(config.streaming.idle_timeout_secs, 300);
        assert_eq!(config.traversal.max_nodes, 10_000);
    }

    #[test]
    fn test_reap_interval_never_zero() {
        let streaming = StreamingConfig {
            reap_interval_secs: 0,
            ..StreamingConfig::default()
        };
        assert_eq!(streaming.reap_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_default_stations_root_not_empty() {
        let root = default_stations_root();
        assert!(root.ends_with("Stations"));
    }
}
