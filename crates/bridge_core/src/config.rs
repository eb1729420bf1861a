//! Configuration for a bridge instance.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the bridge's own state directory under the storage root.
pub const STATE_DIR: &str = ".bridge";

const REDACTED: &str = "<REDACTED>";

/// Top-level configuration, read from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Where project repositories live.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Which backing store to use.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Swap job settings. Swapping is disabled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap: Option<SwapConfig>,
}

impl Config {
    /// Loads and validates the file at `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| BridgeError::ConfigError(format!("failed to read config: {}", e)))?;
            Self::parse(&content)?
        } else {
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML without validating.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| BridgeError::ConfigError(format!("failed to parse config: {}", e)))
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BridgeError::ConfigError(format!("failed to serialize config: {}", e)))?;
        fs::write(path, content)
            .map_err(|e| BridgeError::ConfigError(format!("failed to write config: {}", e)))?;
        Ok(())
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.database.kind == DatabaseKind::Postgres {
            if self.database.url.as_deref().map_or(true, str::is_empty) {
                return Err(BridgeError::ConfigError(
                    "database.url is required for the postgres backend".into(),
                ));
            }
            let pool = self.database.pool();
            if pool.max_total < pool.initial_size {
                return Err(BridgeError::ConfigError(format!(
                    "invalid pool sizes: max_total {} < initial_size {}",
                    pool.max_total, pool.initial_size
                )));
            }
        }
        if let Some(swap) = &self.swap {
            if swap.low_gib >= swap.high_gib {
                return Err(BridgeError::ConfigError(format!(
                    "swap.low_gib ({}) must be below swap.high_gib ({})",
                    swap.low_gib, swap.high_gib
                )));
            }
            if swap.interval_millis == 0 {
                return Err(BridgeError::ConfigError(
                    "swap.interval_millis must be positive".into(),
                ));
            }
        }
        Ok(())
    }

    /// Copy with credentials replaced, safe to log.
    pub fn sanitized(&self) -> Self {
        let mut copy = self.clone();
        let redact = |field: &mut Option<String>| {
            if field.is_some() {
                *field = Some(REDACTED.to_string());
            }
        };
        redact(&mut copy.database.url);
        redact(&mut copy.database.username);
        redact(&mut copy.database.password);
        copy
    }

    /// The bridge's own state directory.
    pub fn state_dir(&self) -> PathBuf {
        self.storage.root_dir.join(STATE_DIR)
    }

    /// Path of the embedded database file.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| self.state_dir().join("bridge.redb"))
    }
}

/// Storage-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Directory holding one repository per project (default: `data`).
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("data"),
        }
    }
}

/// Backing store variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// Single-file redb store with in-process locks.
    #[default]
    Embedded,
    /// Shared postgres store with row locks.
    Postgres,
}

/// Backing store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Which backend to use (default: embedded).
    #[serde(default)]
    pub kind: DatabaseKind,

    /// Embedded database file (default: `<root_dir>/.bridge/bridge.redb`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Postgres connection URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Postgres user, if not part of the URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Postgres password, if not part of the URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Connections opened at startup (default: 1).
    #[serde(default = "default_pool_initial_size")]
    pub pool_initial_size: i64,

    /// Maximum open connections (default: 10).
    #[serde(default = "default_pool_max_total")]
    pub pool_max_total: i64,

    /// How long to wait for a free connection (default: 1000).
    #[serde(default = "default_pool_max_wait_millis")]
    pub pool_max_wait_millis: i64,
}

fn default_pool_initial_size() -> i64 {
    1
}

fn default_pool_max_total() -> i64 {
    10
}

fn default_pool_max_wait_millis() -> i64 {
    1000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: DatabaseKind::default(),
            path: None,
            url: None,
            username: None,
            password: None,
            pool_initial_size: default_pool_initial_size(),
            pool_max_total: default_pool_max_total(),
            pool_max_wait_millis: default_pool_max_wait_millis(),
        }
    }
}

impl DatabaseConfig {
    /// Pool sizing with out-of-range values replaced by their floors.
    pub fn pool(&self) -> PoolSettings {
        PoolSettings {
            initial_size: if self.pool_initial_size < 1 { 1 } else { self.pool_initial_size as u32 },
            max_total: if self.pool_max_total < 1 { 1 } else { self.pool_max_total as u32 },
            max_wait: Duration::from_millis(if self.pool_max_wait_millis < 1 {
                1000
            } else {
                self.pool_max_wait_millis as u64
            }),
        }
    }
}

/// Normalized connection pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Connections opened at startup.
    pub initial_size: u32,
    /// Maximum open connections.
    pub max_total: u32,
    /// Wait for a free connection before failing.
    pub max_wait: Duration,
}

/// Swap job configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwapConfig {
    /// Never evict below this many resident projects.
    pub min_projects: usize,
    /// Evict down to this many GiB.
    pub low_gib: u64,
    /// Start evicting above this many GiB.
    pub high_gib: u64,
    /// Delay between the end of one run and the start of the next.
    pub interval_millis: u64,
    /// `gzip` or `bzip2`; anything else falls back to bzip2.
    #[serde(default = "default_compression_method")]
    pub compression_method: String,
    /// Where swapped archives go.
    #[serde(default)]
    pub store: SwapStoreConfig,
}

fn default_compression_method() -> String {
    "bzip2".to_string()
}

/// Swap storage variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapStoreKind {
    /// One file per project in a directory.
    #[default]
    Dir,
    /// In memory; lost on exit. Only accepted by `Services::from_config_with_memory_swap`.
    Memory,
}

/// Swap storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SwapStoreConfig {
    /// Which store to use (default: dir).
    #[serde(default)]
    pub kind: SwapStoreKind,
    /// Blob directory (default: `<root_dir>/.bridge/swap`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}
