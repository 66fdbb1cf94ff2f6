//! Configuration management for dlx

pub mod schema;

pub use schema::Config;

use crate::cache::lock::LockOptions;
use crate::error::{DlxError, DlxResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

/// Overrides the cache entry root
pub const CACHE_DIR_ENV: &str = "DLX_CACHE_DIR";

/// Overrides the `~/.dlx` base directory
pub const HOME_ENV: &str = "DLX_HOME";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dlx")
            .join("config.toml")
    }

    /// Base directory for all dlx state (`~/.dlx`)
    pub fn dlx_home() -> PathBuf {
        if let Some(dir) = non_empty_env(HOME_ENV) {
            return dir;
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dlx")
    }

    /// Root directory holding one subdirectory per cache entry
    ///
    /// Precedence: `DLX_CACHE_DIR`, then `cache.dir` from config, then
    /// `~/.dlx/cache`.
    pub fn cache_root(config: &Config) -> PathBuf {
        if let Some(dir) = non_empty_env(CACHE_DIR_ENV) {
            return dir;
        }
        config
            .cache
            .dir
            .clone()
            .unwrap_or_else(|| Self::dlx_home().join("cache"))
    }

    /// Directory of the persistent tier of memoized lookups
    pub fn ttl_store_dir() -> PathBuf {
        Self::dlx_home().join("ttl")
    }

    /// Lock timings for cache entries
    pub fn install_lock_options(config: &Config) -> LockOptions {
        LockOptions {
            stale_timeout: Duration::from_millis(config.lock.stale_timeout_ms),
            lock_timeout: Duration::from_millis(config.lock.install_timeout_ms),
            touch_interval: Duration::from_millis(config.lock.touch_interval_ms),
        }
    }

    /// Lock timings for memoized lookups
    pub fn memo_lock_options(config: &Config) -> LockOptions {
        LockOptions {
            lock_timeout: Duration::from_millis(config.lock.memo_timeout_ms),
            ..Self::install_lock_options(config)
        }
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> DlxResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> DlxResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| DlxError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| DlxError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.lock.validate().map_err(|reason| DlxError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> DlxResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DlxError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            DlxError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty_env(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
