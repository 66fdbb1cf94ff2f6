//! Configuration schema for dlx
//!
//! Configuration is stored at `~/.config/dlx/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Cache location and freshness
    pub cache: CacheConfig,

    /// Cross-process lock timings
    pub lock: LockConfig,

    /// Download and registry settings
    pub network: NetworkConfig,

    /// Package update notifications
    pub update_check: UpdateCheckConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root override (DLX_CACHE_DIR takes precedence)
    pub dir: Option<PathBuf>,

    /// Entries older than this are refetched
    pub ttl_hours: u32,

    /// `dlx cache gc` removes entries older than N days (0 = disabled)
    pub gc_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            ttl_hours: 24 * 7,
            gc_days: 30,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.ttl_hours) * 3600)
    }
}

/// Lock timings, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// A lock file untouched for this long is considered abandoned
    pub stale_timeout_ms: u64,

    /// How often the holder refreshes the lock file mtime
    pub touch_interval_ms: u64,

    /// Maximum wait for the lock of a binary or package entry
    pub install_timeout_ms: u64,

    /// Maximum wait for the lock of a memoized lookup
    pub memo_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_timeout_ms: 5_000,
            touch_interval_ms: 2_000,
            install_timeout_ms: 120_000,
            memo_timeout_ms: 10_000,
        }
    }
}

impl LockConfig {
    /// A holder must refresh its lock well before waiters call it abandoned
    pub fn validate(&self) -> Result<(), String> {
        if self.touch_interval_ms == 0 {
            return Err("lock.touch_interval_ms must be greater than 0".to_string());
        }
        if self.touch_interval_ms >= self.stale_timeout_ms {
            return Err(format!(
                "lock.touch_interval_ms ({}) must be less than lock.stale_timeout_ms ({})",
                self.touch_interval_ms, self.stale_timeout_ms
            ));
        }
        Ok(())
    }
}

/// Network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Overall timeout for a single download
    pub timeout_secs: u64,

    /// Retries for transient network failures (not-found is never retried)
    pub retries: u32,

    /// Package registry base URL
    pub registry: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            retries: 2,
            registry: "https://registry.npmjs.org".to_string(),
        }
    }
}

/// Update check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateCheckConfig {
    /// Look up newer versions of cached packages
    pub enabled: bool,

    /// Minimum hours between lookups (and between notifications)
    pub interval_hours: u32,
}

impl Default for UpdateCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: 24,
        }
    }
}

impl UpdateCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_hours) * 3600)
    }
}
