//! Newer-version notices for cached packages
//!
//! When an exact-version package is served from the cache, the registry's
//! `latest` tag is consulted at most once per interval and the result is
//! recorded in the entry's `update_check`. Lookups are memoized in a
//! [`TtlCache`] so unrelated entries of the same package share them.
//! Nothing here can fail a run.

use crate::cache::entry::now_ms;
use crate::cache::lock::{with_lock, LockOptions};
use crate::cache::ttl::{ClearOptions, TtlCache, TtlCacheOptions};
use crate::config::{Config, ConfigManager};
use crate::error::{DlxError, DlxResult};
use crate::fetch::{Downloader, UreqDownloader};
use crate::install::pipeline::Installed;
use crate::install::spec::PackageSpec;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Registry lookups are small; keep them well below the download timeout
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Namespace of memoized lookups in the TTL store
const VERSIONS_PREFIX: &str = "registry-latest";

pub struct UpdateChecker {
    downloader: Arc<dyn Downloader>,
    registry: String,
    interval: Duration,
    lock: LockOptions,
    versions: TtlCache<String>,
}

impl UpdateChecker {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        registry: impl Into<String>,
        interval: Duration,
        store_dir: PathBuf,
        lock: LockOptions,
    ) -> Self {
        let versions = TtlCache::create(TtlCacheOptions {
            dir: store_dir,
            prefix: VERSIONS_PREFIX.to_string(),
            ttl: interval,
            memoize: true,
            lock,
        });

        Self {
            downloader,
            registry: registry.into(),
            interval,
            lock,
            versions,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(UreqDownloader::new(LOOKUP_TIMEOUT)),
            config.network.registry.clone(),
            config.update_check.interval(),
            ConfigManager::ttl_store_dir(),
            ConfigManager::memo_lock_options(config),
        )
    }

    /// Latest published version of `package`, memoized
    pub async fn latest_version(&self, package: &str) -> DlxResult<String> {
        let url = latest_url(&self.registry, package);
        self.versions
            .get_or_fetch(package, || async {
                let doc = self.downloader.fetch_json(&url).await?;
                doc.get("version")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| DlxError::NotFound {
                        artifact: package.to_string(),
                        source_desc: "registry response has no version".to_string(),
                    })
            })
            .await
    }

    /// Drop every memoized lookup, in memory and on disk
    pub async fn forget(&self) -> DlxResult<()> {
        self.versions.clear(ClearOptions::default()).await
    }

    /// Record an update check for a cache hit
    ///
    /// Returns the newer version when a notice was due.
    pub async fn check(&self, installed: &Installed, spec: &PackageSpec) -> Option<String> {
        if installed.fetched || !spec.is_exact() {
            return None;
        }

        match self.check_entry(installed, spec).await {
            Ok(newer) => newer,
            Err(e) => {
                debug!("Update check for {} skipped: {}", spec, e);
                None
            }
        }
    }

    async fn check_entry(&self, installed: &Installed, spec: &PackageSpec) -> DlxResult<Option<String>> {
        let current = spec.version_or_latest();
        let interval_ms = self.interval.as_millis() as i64;
        let entry = &installed.entry;

        with_lock(&entry.lock_path(), &self.lock, || async {
            // Re-read under the lock; another process may have checked already
            let Some(mut meta) = entry.read_metadata().await.valid() else {
                return Ok(None);
            };
            let mut record = meta.update_check.clone().unwrap_or_default();

            let now = now_ms();
            if now - record.last_check < interval_ms {
                return Ok(None);
            }

            let latest = self.latest_version(&spec.name).await?;
            record.last_check = now;
            record.latest_known = Some(latest.clone());

            let notify = is_newer(&latest, current) && now - record.last_notification >= interval_ms;
            if notify {
                record.last_notification = now;
            }

            meta.update_check = Some(record);
            entry.write_metadata(&meta).await?;

            if notify {
                warn!(
                    "{} {} is available (cached {}). Run with --force to update",
                    spec.name, latest, current
                );
            }
            Ok(notify.then_some(latest))
        })
        .await
    }
}

/// `<registry>/<name>/latest`, with the scope separator escaped
fn latest_url(registry: &str, package: &str) -> String {
    format!(
        "{}/{}/latest",
        registry.trim_end_matches('/'),
        package.replace('/', "%2f")
    )
}

fn is_newer(candidate: &str, current: &str) -> bool {
    let parse = |v: &str| semver::Version::parse(v.trim().trim_start_matches('v')).ok();
    match (parse(candidate), parse(current)) {
        (Some(candidate), Some(current)) => candidate > current,
        _ => false,
    }
}
