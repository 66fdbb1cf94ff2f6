//! Acquire, fetch, verify, publish
//!
//! Every request walks the same state machine:
//!
//! ```text
//! CheckFresh ──fresh──────────────────────────────────────────► Ready
//!     │ stale / forced / absent
//!     ▼
//! AcquireLock ─► DoubleCheck ──fresh─────────────────────────► Ready
//!                    │ still stale
//!                    ▼
//!                  Fetch ─► Verify ─► Publish (payload, then metadata) ─► Ready
//!                    └────────┴──────── error ──────────────────────────► Failed
//! ```
//!
//! Payloads are materialized beside their final location and renamed into
//! place only after verification, so a failed refresh leaves the previous
//! published state untouched.

use crate::cache::entry::{
    file_digest, now_ms, CacheEntry, EntryMetadata, EntryStore, Payload, Source, MODULES_DIR,
};
use crate::cache::key::{binary_spec, cache_key};
use crate::cache::lock::{with_lock, LockOptions};
use crate::config::{Config, ConfigManager};
use crate::error::{DlxError, DlxResult};
use crate::fetch::{Downloader, NpmExtractor, PackageExtractor, UreqDownloader};
use crate::install::spec::{resolve_force, PackageSpec};
use std::future::Future;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default delay before the first retry of a transient failure
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Request for a single downloaded binary
#[derive(Debug, Clone)]
pub struct BinaryRequest {
    pub url: String,
    /// File name of the payload inside the entry
    pub name: String,
    /// Expected SHA-256 (hex, optionally `sha256-` or `sha256:` prefixed)
    pub integrity: Option<String>,
    pub force: bool,
}

impl BinaryRequest {
    /// Request named after the last path segment of `url`
    pub fn from_url(url: impl Into<String>) -> DlxResult<Self> {
        let url = url.into();
        let name = default_binary_name(&url)?;
        Ok(Self {
            url,
            name,
            integrity: None,
            force: false,
        })
    }
}

/// Request for a registry package
#[derive(Debug, Clone)]
pub struct PackageRequest {
    pub spec: PackageSpec,
    /// `None` lets the range policy decide
    pub force: Option<bool>,
    /// Expected manifest digest
    pub integrity: Option<String>,
}

impl PackageRequest {
    pub fn new(spec: PackageSpec) -> Self {
        Self {
            spec,
            force: None,
            integrity: None,
        }
    }
}

/// A ready-to-execute payload
#[derive(Debug, Clone)]
pub struct Installed {
    pub key: String,
    pub entry: CacheEntry,
    pub payload: Payload,
    pub integrity: String,
    /// Whether this request performed the fetch
    pub fetched: bool,
    pub metadata: EntryMetadata,
}

/// Drives requests through the pipeline against one entry store
pub struct Installer {
    store: EntryStore,
    downloader: Arc<dyn Downloader>,
    extractor: Arc<dyn PackageExtractor>,
    lock: LockOptions,
    ttl: Duration,
    retries: u32,
    retry_delay: Duration,
}

impl Installer {
    pub fn new(
        store: EntryStore,
        downloader: Arc<dyn Downloader>,
        extractor: Arc<dyn PackageExtractor>,
    ) -> Self {
        Self {
            store,
            downloader,
            extractor,
            lock: LockOptions::default(),
            ttl: Duration::from_secs(168 * 3600),
            retries: 2,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Installer wired to the real collaborators as configured
    pub fn from_config(config: &Config) -> Self {
        let downloader = UreqDownloader::new(Duration::from_secs(config.network.timeout_secs));
        let extractor = NpmExtractor::new().with_registry(config.network.registry.clone());

        Self::new(
            EntryStore::new(ConfigManager::cache_root(config)),
            Arc::new(downloader),
            Arc::new(extractor),
        )
        .with_lock_options(ConfigManager::install_lock_options(config))
        .with_ttl(config.cache.ttl())
        .with_retries(config.network.retries, DEFAULT_RETRY_DELAY)
    }

    pub fn with_lock_options(mut self, lock: LockOptions) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn lock_options(&self) -> &LockOptions {
        &self.lock
    }

    /// Download a single binary, or reuse the cached copy
    pub async fn install_binary(&self, request: &BinaryRequest) -> DlxResult<Installed> {
        validate_binary_name(&request.name)?;

        let key = cache_key(&binary_spec(&request.url, &request.name));
        let entry = self.store.entry(&key);
        let payload = Payload::File(entry.file_payload(&request.name));
        let expected = request.integrity.as_deref();

        self.ensure(&entry, &payload, request.force, expected, || {
            self.fetch_binary(&entry, &payload, request)
        })
        .await
    }

    /// Install a registry package, or reuse the cached install
    pub async fn install_package(&self, request: &PackageRequest) -> DlxResult<Installed> {
        let spec = &request.spec;
        let force = resolve_force(request.force, spec);
        if force && request.force.is_none() {
            debug!("{} is a version range, refreshing", spec);
        }

        let key = cache_key(&spec.cache_spec());
        let entry = self.store.entry(&key);
        let payload = Payload::Package(entry.package_root(&spec.name));
        let expected = request.integrity.as_deref();

        self.ensure(&entry, &payload, force, expected, || {
            self.fetch_package(&entry, request)
        })
        .await
    }

    /// The shared CheckFresh, AcquireLock, DoubleCheck skeleton
    async fn ensure<F, Fut>(
        &self,
        entry: &CacheEntry,
        payload: &Payload,
        force: bool,
        expected: Option<&str>,
        fetch: F,
    ) -> DlxResult<Installed>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DlxResult<EntryMetadata>>,
    {
        let started = now_ms();

        if !force {
            if let Some(meta) = self.reusable(entry, payload, expected, None).await {
                debug!("Cache hit for {}", entry.key());
                return Ok(installed(entry, payload, meta, false));
            }
        }

        self.store.ensure_root().await?;
        entry.ensure_dir().await?;

        with_lock(&entry.lock_path(), &self.lock, || async {
            // A forced request still accepts a publish that finished after it started
            let since = force.then_some(started);
            if let Some(meta) = self.reusable(entry, payload, expected, since).await {
                debug!("Entry {} published while waiting for the lock", entry.key());
                return Ok(installed(entry, payload, meta, false));
            }

            let meta = fetch().await?;
            Ok(installed(entry, payload, meta, true))
        })
        .await
    }

    /// Metadata of a published entry that may be served as-is
    async fn reusable(
        &self,
        entry: &CacheEntry,
        payload: &Payload,
        expected: Option<&str>,
        since: Option<i64>,
    ) -> Option<EntryMetadata> {
        let meta = entry.published(payload).await?;

        let current = match since {
            Some(since) => meta.timestamp.is_some_and(|ts| ts > since),
            None => meta.is_fresh(self.ttl),
        };
        if !current {
            return None;
        }

        if let Some(expected) = expected {
            if normalize_integrity(expected) != normalize_integrity(&meta.integrity) {
                debug!("Cached {} does not match the expected integrity", entry.key());
                return None;
            }
        }
        Some(meta)
    }

    async fn fetch_binary(
        &self,
        entry: &CacheEntry,
        payload: &Payload,
        request: &BinaryRequest,
    ) -> DlxResult<EntryMetadata> {
        let target = payload.path();
        let partial = entry.dir().join(format!("{}.download", request.name));

        info!("Downloading {}", request.url);
        let fetched = self
            .retry_transient(&request.url, || self.downloader.download(&request.url, &partial))
            .await;
        if let Err(e) = fetched {
            remove_file_if_exists(&partial).await;
            return Err(e);
        }

        // Until the rename succeeds, any failure leaves only the partial to clean up
        let published = async {
            let (actual, size) = file_digest(&partial)
                .await
                .map_err(|e| DlxError::io(format!("hashing {}", partial.display()), e))?;
            verify(&request.url, &partial, request.integrity.as_deref(), &actual)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o755))
                    .await
                    .map_err(|e| DlxError::classify_io(&partial, format!("chmod {}", partial.display()), e))?;
            }

            entry.remove_metadata().await?;
            fs::rename(&partial, target)
                .await
                .map_err(|e| DlxError::classify_io(target, format!("publishing {}", target.display()), e))?;
            Ok::<_, DlxError>((actual, size))
        }
        .await;
        let (actual, size) = match published {
            Ok(digest) => digest,
            Err(e) => {
                remove_file_if_exists(&partial).await;
                return Err(e);
            }
        };

        let meta = EntryMetadata::new(entry.key(), actual, size, Source::download(&request.url));
        entry.write_metadata(&meta).await?;
        info!("Cached {} as {}", request.url, entry.key());
        Ok(meta)
    }

    async fn fetch_package(&self, entry: &CacheEntry, request: &PackageRequest) -> DlxResult<EntryMetadata> {
        let staging = entry.dir().join(format!(".staging-{}", Uuid::new_v4()));
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| DlxError::classify_io(&staging, format!("creating {}", staging.display()), e))?;

        let result = self.stage_and_publish(entry, request, &staging).await;
        if let Err(e) = fs::remove_dir_all(&staging).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove staging directory {}: {}", staging.display(), e);
            }
        }
        result
    }

    async fn stage_and_publish(
        &self,
        entry: &CacheEntry,
        request: &PackageRequest,
        staging: &Path,
    ) -> DlxResult<EntryMetadata> {
        let spec = &request.spec;
        let install_arg = spec.install_arg();

        info!("Installing {}", install_arg);
        self.retry_transient(&install_arg, || self.extractor.extract(&install_arg, staging))
            .await?;

        let staged_modules = staging.join(MODULES_DIR);
        let staged_root = staged_modules.join(&spec.name);
        if !fs::try_exists(staged_root.join("package.json")).await.unwrap_or(false) {
            return Err(DlxError::ExtractFailed {
                spec: install_arg,
                reason: format!("no package.json at {}", staged_root.display()),
            });
        }

        let (actual, size) = Payload::Package(staged_root.clone())
            .integrity()
            .await
            .map_err(|e| DlxError::io(format!("hashing {}", staged_root.display()), e))?;
        verify(&install_arg, &staged_root, request.integrity.as_deref(), &actual)?;

        // Demote first so no reader pairs old metadata with the new tree
        entry.remove_metadata().await?;
        let modules = entry.modules_dir();
        match fs::remove_dir_all(&modules).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(DlxError::classify_io(&modules, format!("removing {}", modules.display()), e)),
        }
        fs::rename(&staged_modules, &modules)
            .await
            .map_err(|e| DlxError::classify_io(&modules, format!("publishing {}", modules.display()), e))?;

        let meta = EntryMetadata::new(entry.key(), actual, size, Source::package(spec.cache_spec()));
        entry.write_metadata(&meta).await?;
        info!("Cached {} as {}", spec, entry.key());
        Ok(meta)
    }

    /// Retry transient network failures with exponential backoff
    async fn retry_transient<T, F, Fut>(&self, artifact: &str, mut op: F) -> DlxResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DlxResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Err(e) if attempt < self.retries && e.is_retryable() => {
                    let delay = self.retry_delay.saturating_mul(1 << attempt.min(6));
                    attempt += 1;
                    warn!(
                        "Fetching {} failed ({}), retry {}/{} in {:?}",
                        artifact, e, attempt, self.retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

fn installed(entry: &CacheEntry, payload: &Payload, metadata: EntryMetadata, fetched: bool) -> Installed {
    Installed {
        key: entry.key().to_string(),
        entry: entry.clone(),
        payload: payload.clone(),
        integrity: metadata.integrity.clone(),
        fetched,
        metadata,
    }
}

/// Lowercase hex with any `sha256-` / `sha256:` prefix removed
pub fn normalize_integrity(value: &str) -> String {
    let value = value.trim();
    value
        .strip_prefix("sha256-")
        .or_else(|| value.strip_prefix("sha256:"))
        .unwrap_or(value)
        .to_ascii_lowercase()
}

fn verify(artifact: &str, path: &Path, expected: Option<&str>, actual: &str) -> DlxResult<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let (expected, actual) = (normalize_integrity(expected), normalize_integrity(actual));
    if expected == actual {
        return Ok(());
    }
    Err(DlxError::IntegrityMismatch {
        artifact: artifact.to_string(),
        path: path.to_path_buf(),
        expected,
        actual,
    })
}

async fn remove_file_if_exists(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial {}: {}", path.display(), e),
    }
}

/// Reject names that would escape or collide with entry bookkeeping
pub fn validate_binary_name(name: &str) -> DlxResult<()> {
    let reason = if name.is_empty() {
        Some("binary name is empty")
    } else if name.contains(['/', '\\']) {
        Some("binary name must not contain path separators")
    } else if name == "." || name == ".." {
        Some("binary name must not be a relative directory")
    } else if name.starts_with(".dlx") || name.starts_with(".staging-") || name == MODULES_DIR {
        Some("binary name is reserved")
    } else if name.ends_with(".download") {
        Some("binary name must not end in .download")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(DlxError::InvalidSpec {
            spec: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Last non-empty path segment of a URL, without query or fragment
pub fn default_binary_name(url: &str) -> DlxResult<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map_or(path, |(_, rest)| rest);
    let name = path
        .split_once('/')
        .map(|(_, p)| p)
        .unwrap_or("")
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .ok_or_else(|| DlxError::InvalidSpec {
            spec: url.to_string(),
            reason: "cannot derive a binary name from the URL, pass --name".to_string(),
        })?;

    validate_binary_name(name)?;
    Ok(name.to_string())
}
