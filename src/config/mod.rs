//! Configuration module for VizFlow-RS
//!
//! This module handles engine configuration:
//! - Cache policy (trajectory caching, auxiliary entry limit)
//! - Executor settings (worker threads, task event queue, execution context)
//! - Logging settings
//! - Animation settings used by the headless runner
//!
//! # Config Location
//!
//! The default config file is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.hxyulin.vizflow-rs/engine.toml`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.vizflow-rs/engine.toml`
//! - **Windows**: `%APPDATA%\dev.hxyulin.vizflow-rs\engine.toml`
//!
//! Files ending in `.json` are read and written as JSON, everything else
//! ending in `.toml` as TOML.
//!
//! # Environment Overrides
//!
//! - `VIZFLOW_WORKER_THREADS` - number of worker threads (0 = all cores)
//! - `VIZFLOW_TRAJECTORY_CACHING` - `true`/`false`
//! - `VIZFLOW_MAX_CACHE_ENTRIES` - cache entry limit without trajectory caching
//!
//! # Example
//!
//! ```ignore
//! use vizflow_rs::config::EngineConfig;
//!
//! let mut config = EngineConfig::load_or_default();
//! config.cache.trajectory_caching = true;
//! config.save("engine.toml")?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{CoreError, Result};
use crate::types::ExecutionContext;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.hxyulin.vizflow-rs";

/// Default config filename
pub const CONFIG_FILE: &str = "engine.toml";

/// Current config format version
pub const CONFIG_VERSION: u32 = 1;

/// Default cache entry limit when trajectory caching is off
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 4;

/// Default capacity of the task event channel
pub const DEFAULT_TASK_EVENT_CAPACITY: usize = 1024;

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "info,vizflow_rs=debug";

pub const ENV_WORKER_THREADS: &str = "VIZFLOW_WORKER_THREADS";
pub const ENV_TRAJECTORY_CACHING: &str = "VIZFLOW_TRAJECTORY_CACHING";
pub const ENV_MAX_CACHE_ENTRIES: &str = "VIZFLOW_MAX_CACHE_ENTRIES";

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        CoreError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            CoreError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

// ==================== File Format ====================

/// On-disk encoding of a config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from the file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(ConfigFormat::Toml),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(ConfigFormat::Json),
            _ => Err(CoreError::Config(format!(
                "Unsupported config file extension: {:?}",
                path
            ))),
        }
    }
}

// ==================== Engine Config ====================

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Version for future migration support
    #[serde(default = "default_config_version")]
    pub version: u32,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub executor: ExecutorSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub animation: AnimationSettings,
}

fn default_config_version() -> u32 {
    CONFIG_VERSION
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            cache: CacheSettings::default(),
            executor: ExecutorSettings::default(),
            logging: LoggingSettings::default(),
            animation: AnimationSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Path of the config file in the app data directory
    pub fn default_path() -> Option<PathBuf> {
        app_data_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Load a config file, choosing the format by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: EngineConfig = match format {
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| {
                CoreError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?,
            ConfigFormat::Json => serde_json::from_str(&content).map_err(|e| {
                CoreError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?,
        };

        if config.version > CONFIG_VERSION {
            tracing::warn!(
                "Config file {:?} has version {}, newer than supported version {}",
                path,
                config.version,
                CONFIG_VERSION
            );
        }
        Ok(config)
    }

    /// Load the config from the default location with environment overrides
    /// applied, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config, using defaults: {}", e);
                Self::default()
            }),
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config
    }

    /// Save the config, choosing the format by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| CoreError::Serialization(e.to_string()))?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| CoreError::Serialization(e.to_string()))?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                CoreError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }
        std::fs::write(path, content)
            .map_err(|e| CoreError::Config(format!("Failed to write config file: {}", e)))
    }

    /// Save to the default location
    pub fn save_default(&self) -> Result<PathBuf> {
        let path = ensure_app_data_dir()?.join(CONFIG_FILE);
        self.save(&path)?;
        Ok(path)
    }

    /// Apply `VIZFLOW_*` environment variables on top of the loaded values
    pub fn apply_env_overrides(&mut self) {
        if let Some(threads) = env_parse::<usize>(ENV_WORKER_THREADS) {
            self.executor.worker_threads = threads;
        }
        if let Some(enabled) = env_bool(ENV_TRAJECTORY_CACHING) {
            self.cache.trajectory_caching = enabled;
        }
        if let Some(max) = env_parse::<usize>(ENV_MAX_CACHE_ENTRIES) {
            self.cache.max_entries = max;
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring invalid value {:?} for {}", value, name);
            None
        }
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!("Ignoring invalid value {:?} for {}", value, name);
            None
        }
    }
}

// ==================== Sections ====================

/// Pipeline cache policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Keep every evaluated frame instead of a bounded set of entries
    #[serde(default)]
    pub trajectory_caching: bool,

    /// Primary entry plus auxiliary entries kept without trajectory caching
    #[serde(default = "default_max_cache_entries")]
    pub max_entries: usize,
}

fn default_max_cache_entries() -> usize {
    DEFAULT_MAX_CACHE_ENTRIES
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            trajectory_caching: false,
            max_entries: DEFAULT_MAX_CACHE_ENTRIES,
        }
    }
}

/// Task runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Worker threads for asynchronous stages (0 = available parallelism)
    #[serde(default)]
    pub worker_threads: usize,

    /// Capacity of the task event channel; overflowing events are dropped
    #[serde(default = "default_task_event_capacity")]
    pub task_event_capacity: usize,

    /// Execution context the dataset starts in
    #[serde(default)]
    pub initial_context: ExecutionContext,
}

fn default_task_event_capacity() -> usize {
    DEFAULT_TASK_EVENT_CAPACITY
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            task_event_capacity: DEFAULT_TASK_EVENT_CAPACITY,
            initial_context: ExecutionContext::Interactive,
        }
    }
}

/// Logging output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Directory for daily rolling log files; no file output when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// File name prefix of the rolling log files
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_log_file_prefix() -> String {
    "vizflow.log".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            directory: None,
            file_prefix: default_log_file_prefix(),
        }
    }
}

// ==================== Tests ====================
