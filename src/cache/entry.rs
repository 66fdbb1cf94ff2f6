//! Cache entry layout and metadata
//!
//! Each entry owns `<root>/<key>/`, holding the lock file, the metadata
//! document and the payload. An entry is published only when its metadata
//! parses, names the right key and its integrity matches the payload;
//! anything else is treated as absent and refetched.

use crate::cache::lock::LOCK_FILE;
use crate::error::{DlxError, DlxResult};
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::debug;
use uuid::Uuid;

/// Metadata document name inside an entry directory
pub const METADATA_FILE: &str = ".dlx-metadata.json";

/// Schema version written by this implementation
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Directory holding an installed package tree
pub const MODULES_DIR: &str = "node_modules";

/// Current time in epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Where a cached payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Download,
    Extract,
    Package,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Download => "download",
            Self::Extract => "extract",
            Self::Package => "package",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Provenance record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
}

impl Source {
    pub fn download(url: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Download,
            url: Some(url.into()),
            path: None,
            spec: None,
        }
    }

    pub fn package(spec: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Package,
            url: None,
            path: None,
            spec: Some(spec.into()),
        }
    }

    /// URL, path or spec, whichever is set
    pub fn origin(&self) -> &str {
        self.url
            .as_deref()
            .or(self.spec.as_deref())
            .or(self.path.as_deref())
            .unwrap_or("")
    }
}

/// Last remote update lookup for a package entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheck {
    #[serde(default)]
    pub last_check: i64,
    #[serde(default)]
    pub last_notification: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_known: Option<String>,
}

/// Persisted metadata of a cache entry
///
/// Shared with other tools, so optional fields default and unknown fields
/// are carried through `extra` on rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(default)]
    pub version: String,

    pub cache_key: String,

    /// Epoch ms; `None` when missing or not a positive number
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<i64>,

    #[serde(default)]
    pub integrity: String,

    #[serde(default)]
    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_check: Option<UpdateCheck>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let ms = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .filter(|ms| *ms > 0);
    Ok(ms)
}

impl EntryMetadata {
    /// Metadata for a freshly published payload
    pub fn new(cache_key: &str, integrity: String, size: u64, source: Source) -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            cache_key: cache_key.to_string(),
            timestamp: Some(now_ms()),
            integrity,
            size,
            source: Some(source),
            update_check: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Age relative to `now`; `None` (infinitely old) without a valid timestamp
    pub fn age_at(&self, now: i64) -> Option<Duration> {
        let timestamp = self.timestamp?;
        Some(Duration::from_millis(now.saturating_sub(timestamp).max(0) as u64))
    }

    /// Age right now
    pub fn age(&self) -> Option<Duration> {
        self.age_at(now_ms())
    }

    /// Whether the entry is younger than `ttl`
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age().is_some_and(|age| age < ttl)
    }
}

/// Outcome of reading a metadata document
#[derive(Debug)]
pub enum MetadataRead {
    Missing,
    Corrupt(String),
    Valid(EntryMetadata),
}

impl MetadataRead {
    pub fn valid(self) -> Option<EntryMetadata> {
        match self {
            Self::Valid(meta) => Some(meta),
            _ => None,
        }
    }
}

/// Entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Missing, empty, or without usable metadata
    Absent,
    /// A live lock is held by some process
    Writing,
    /// Metadata present and consistent
    Published,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Writing => write!(f, "writing"),
            Self::Published => write!(f, "published"),
        }
    }
}

/// The payload of an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A single downloaded file
    File(PathBuf),
    /// An installed package root containing `package.json`
    Package(PathBuf),
}

impl Payload {
    pub fn path(&self) -> &Path {
        match self {
            Self::File(path) | Self::Package(path) => path,
        }
    }

    /// Integrity string and size in bytes of the payload
    ///
    /// Files hash to plain hex; packages hash their manifest as
    /// `sha256-<hex>` and report the size of the whole tree.
    pub async fn integrity(&self) -> std::io::Result<(String, u64)> {
        match self {
            Self::File(path) => file_digest(path).await,
            Self::Package(root) => {
                let (digest, _) = file_digest(&root.join("package.json")).await?;
                let size = dir_size(root).await?;
                Ok((format!("sha256-{}", digest), size))
            }
        }
    }
}

/// Streaming SHA-256 of a file, returning hex digest and length
pub async fn file_digest(path: &Path) -> std::io::Result<(String, u64)> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    Ok((hex::encode(hasher.finalize()), total))
}

/// Total size of regular files below `root`, without following symlinks
pub async fn dir_size(root: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                total += entry.metadata().await?.len();
            }
        }
    }

    Ok(total)
}

/// Root directory of all cache entries
#[derive(Debug, Clone)]
pub struct EntryStore {
    root: PathBuf,
}

impl EntryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entry addressed by `key`
    pub fn entry(&self, key: &str) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            dir: self.root.join(key),
        }
    }

    /// Create the root directory, classifying failures
    pub async fn ensure_root(&self) -> DlxResult<()> {
        create_dir_classified(&self.root).await
    }
}

/// One cache entry directory
#[derive(Debug, Clone)]
pub struct CacheEntry {
    key: String,
    dir: PathBuf,
}

impl CacheEntry {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Path of a single-file payload
    pub fn file_payload(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Directory holding installed packages
    pub fn modules_dir(&self) -> PathBuf {
        self.dir.join(MODULES_DIR)
    }

    /// Installed package root for `package_name` (scoped names nest)
    pub fn package_root(&self, package_name: &str) -> PathBuf {
        self.modules_dir().join(package_name)
    }

    /// Create the entry directory, classifying failures
    pub async fn ensure_dir(&self) -> DlxResult<()> {
        create_dir_classified(&self.dir).await
    }

    /// Read and parse the metadata document
    pub async fn read_metadata(&self) -> MetadataRead {
        let path = self.metadata_path();
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return MetadataRead::Missing,
            Err(e) => return MetadataRead::Corrupt(e.to_string()),
        };

        match serde_json::from_slice::<EntryMetadata>(&content) {
            Ok(meta) if meta.cache_key == self.key => MetadataRead::Valid(meta),
            Ok(meta) => MetadataRead::Corrupt(format!(
                "metadata names key {} but entry is {}",
                meta.cache_key, self.key
            )),
            Err(e) => MetadataRead::Corrupt(e.to_string()),
        }
    }

    /// Metadata of a published entry whose integrity matches `payload`
    ///
    /// Returns `None` for absent, corrupt or mismatched entries; callers
    /// treat that as "must refetch".
    pub async fn published(&self, payload: &Payload) -> Option<EntryMetadata> {
        let meta = match self.read_metadata().await {
            MetadataRead::Valid(meta) => meta,
            MetadataRead::Missing => return None,
            MetadataRead::Corrupt(reason) => {
                debug!("Ignoring corrupt metadata for {}: {}", self.key, reason);
                return None;
            }
        };

        match payload.integrity().await {
            Ok((integrity, _)) if integrity == meta.integrity => Some(meta),
            Ok(_) => {
                debug!("Payload of {} does not match its metadata", self.key);
                None
            }
            Err(e) => {
                debug!("Payload of {} unreadable: {}", self.key, e);
                None
            }
        }
    }

    /// Write metadata atomically (temp file + rename)
    pub async fn write_metadata(&self, meta: &EntryMetadata) -> DlxResult<()> {
        let path = self.metadata_path();
        let tmp = self.dir.join(format!("{}.{}.tmp", METADATA_FILE, Uuid::new_v4()));
        let content = serde_json::to_vec_pretty(meta)?;

        fs::write(&tmp, content)
            .await
            .map_err(|e| DlxError::classify_io(&tmp, format!("writing {}", tmp.display()), e))?;
        fs::rename(&tmp, &path).await.map_err(|e| {
            DlxError::io(format!("publishing metadata {}", path.display()), e)
        })?;

        debug!("Published metadata for {}", self.key);
        Ok(())
    }

    /// Delete the metadata document, demoting the entry to absent
    pub async fn remove_metadata(&self) -> DlxResult<()> {
        let path = self.metadata_path();
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DlxError::io(format!("removing {}", path.display()), e)),
        }
    }

    /// Whether a lock file younger than `stale_timeout` exists
    pub async fn is_locked(&self, stale_timeout: Duration) -> bool {
        let Ok(meta) = fs::metadata(self.lock_path()).await else {
            return false;
        };
        meta.modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .map_or(true, |age| age <= stale_timeout)
    }

    /// Lifecycle state, without verifying payload integrity
    pub async fn state(&self, stale_timeout: Duration) -> EntryState {
        if self.is_locked(stale_timeout).await {
            return EntryState::Writing;
        }
        match self.read_metadata().await {
            MetadataRead::Valid(_) => EntryState::Published,
            _ => EntryState::Absent,
        }
    }

    /// Whether the directory is missing or has no children
    pub async fn is_empty(&self) -> bool {
        match fs::read_dir(&self.dir).await {
            Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
            Err(e) => e.kind() == ErrorKind::NotFound,
        }
    }
}

async fn create_dir_classified(dir: &Path) -> DlxResult<()> {
    fs::create_dir_all(dir).await.map_err(|e| {
        DlxError::classify_io(dir, format!("creating directory {}", dir.display()), e)
    })
}
