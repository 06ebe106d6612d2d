//! Per-shard configuration via `shard.toml`.
//!
//! On first open, a default `shard.toml` is created next to the
//! shard's database file; to change settings, edit the file and
//! restart, the same model the teacher's database config uses.

use serde::{Deserialize, Serialize};

/// Config file name placed in each shard's data directory.
pub const CONFIG_FILE_NAME: &str = "shard.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    20
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Shard runtime configuration loaded from `shard.toml`.
///
/// ```toml
/// max_bytes = 1073741824
/// busy_timeout_ms = 5000
///
/// [retry]
/// max_attempts = 3
/// base_delay_ms = 20
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Capacity limit enforced before every mutation/DDL.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    /// SQLite busy timeout before a lock wait surfaces as busy.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_bytes() -> u64 {
    1 << 30 // 1 GiB
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for ShardConfig {
    fn default() -> Self {
        ShardConfig {
            max_bytes: default_max_bytes(),
            busy_timeout_ms: default_busy_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl ShardConfig {
    /// Load from a TOML file, or write and return the default if
    /// absent.
    pub fn load_or_default(path: &std::path::Path) -> meridian_core::Result<Self> {
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            toml::from_str(&text)
                .map_err(|e| meridian_core::Error::ConfigInvalid(e.to_string()))
        } else {
            let config = ShardConfig::default();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, toml::to_string_pretty(&config).unwrap())?;
            Ok(config)
        }
    }
}
