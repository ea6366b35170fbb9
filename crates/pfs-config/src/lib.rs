//! # pfs-config
//!
//! Configuration management for the ProxyFS read client.
//!
//! Loads configuration from:
//! 1. `~/.pfs/config.toml` (global)
//! 2. `.pfs/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    // A poisoned lock still holds a fully written Config.
    CONFIG.read().unwrap_or_else(|e| e.into_inner())
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(|e| e.into_inner()) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Read algorithm used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Fetch a fresh read plan and all bytes on every call
    None,
    /// Cache cache-line segments keyed by backend object
    #[default]
    Segment,
    /// Cache cache-line segments keyed by inode, reusing the whole-file plan
    File,
}

impl FromStr for ReadMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "nocache" => Ok(ReadMode::None),
            "segment" | "seg" => Ok(ReadMode::Segment),
            "file" => Ok(ReadMode::File),
            other => Err(ConfigError::Invalid(format!("unknown read mode: {other}"))),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub read: ReadConfig,
    pub metadata: MetadataConfig,
    pub blob: BlobConfig,
    pub cache: CacheConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Global config (~/.pfs/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::from_file(&global_path)?;
            }
        }

        // 2. Project config (.pfs/config.toml) overrides global
        let project_path = Path::new(".pfs/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let project_config = Self::from_file(project_path)?;
            config.merge(project_config);
        }

        // 3. Environment
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse a single config file without merging or env overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.pfs/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".pfs/config.toml"))
    }

    /// Merge another config (project overrides).
    ///
    /// Only values that differ from the defaults replace the current ones.
    pub fn merge(&mut self, other: Config) {
        let defaults = Config::default();

        if other.read.mode != defaults.read.mode {
            self.read.mode = other.read.mode;
        }
        if other.read.cache_line_size != defaults.read.cache_line_size {
            self.read.cache_line_size = other.read.cache_line_size;
        }
        if other.read.max_plan_retries != defaults.read.max_plan_retries {
            self.read.max_plan_retries = other.read.max_plan_retries;
        }
        if other.metadata.socket != defaults.metadata.socket {
            self.metadata.socket = other.metadata.socket;
        }
        if other.metadata.mount_id != defaults.metadata.mount_id {
            self.metadata.mount_id = other.metadata.mount_id;
        }
        if other.metadata.reconnect_attempts != defaults.metadata.reconnect_attempts {
            self.metadata.reconnect_attempts = other.metadata.reconnect_attempts;
        }
        if other.blob.root != defaults.blob.root {
            self.blob.root = other.blob.root;
        }
        if other.blob.pool_size != defaults.blob.pool_size {
            self.blob.pool_size = other.blob.pool_size;
        }
        if other.blob.acquire_timeout_ms.is_some() {
            self.blob.acquire_timeout_ms = other.blob.acquire_timeout_ms;
        }
        if other.cache.capacity_bytes.is_some() {
            self.cache.capacity_bytes = other.cache.capacity_bytes;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(mode) = std::env::var("PFS_READ_MODE") {
            match mode.parse() {
                Ok(m) => self.read.mode = m,
                Err(e) => tracing::warn!(error = %e, "Ignoring PFS_READ_MODE"),
            }
        }
        if let Ok(line) = std::env::var("PFS_CACHE_LINE_SIZE") {
            if let Ok(n) = line.parse() {
                self.read.cache_line_size = n;
            }
        }
        if let Ok(path) = std::env::var("PFS_METADATA_SOCKET") {
            self.metadata.socket = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("PFS_BLOB_ROOT") {
            self.blob.root = PathBuf::from(path);
        }
    }

    /// Reject values the read path cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read.cache_line_size == 0 {
            return Err(ConfigError::Invalid(
                "read.cache_line_size must be non-zero".to_string(),
            ));
        }
        if self.blob.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "blob.pool_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Read path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadConfig {
    /// Caching strategy
    pub mode: ReadMode,
    /// Alignment unit for cached segments (bytes)
    pub cache_line_size: u64,
    /// Plan fetch attempts before a segment read gives up on a stale plan
    pub max_plan_retries: u32,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            mode: ReadMode::Segment,
            cache_line_size: 64 * 1024,
            max_plan_retries: 8,
        }
    }
}

/// Metadata service connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Unix socket of the metadata daemon
    pub socket: PathBuf,
    /// Mount identifier sent with every request
    pub mount_id: u64,
    /// Reconnects attempted after a connection-fatal transport error
    pub reconnect_attempts: u32,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("/run/pfs/proxyfsd.sock"),
            mount_id: 0,
            reconnect_attempts: 1,
        }
    }
}

/// Blob store client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Root directory of the directory-backed blob store
    pub root: PathBuf,
    /// Pooled connections
    pub pool_size: usize,
    /// Give up waiting for a pooled connection after this long (None = wait forever)
    pub acquire_timeout_ms: Option<u64>,
}

impl BlobConfig {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .map(|h| h.join(".pfs/blobs"))
                .unwrap_or_else(|| PathBuf::from("/tmp/pfs/blobs")),
            pool_size: 16,
            acquire_timeout_ms: None,
        }
    }
}

/// Cache service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte budget of the in-memory cache (None = unbounded)
    pub capacity_bytes: Option<u64>,
}
