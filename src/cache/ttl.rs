//! Two-tier TTL cache for idempotent lookups
//!
//! Tier 1 is an in-process map owned by the cache object; tier 2 is one
//! JSON record per key on disk, shared across invocations. Lookups check
//! tier 1, then tier 2 (promoting hits), and only compute on a full miss.

use crate::cache::entry::now_ms;
use crate::cache::key::cache_key;
use crate::cache::lock::{with_lock, LockOptions};
use crate::error::{DlxError, DlxResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Construction options
#[derive(Debug, Clone)]
pub struct TtlCacheOptions {
    /// Base directory of the persistent tier
    pub dir: PathBuf,
    /// Namespace; records live in `<dir>/<prefix>/`
    pub prefix: String,
    /// Lifetime of a stored value
    pub ttl: Duration,
    /// Keep an in-memory tier
    pub memoize: bool,
    /// Lock timings for persistent writes
    pub lock: LockOptions,
}

/// Options for [`TtlCache::clear`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearOptions {
    /// Clear only the in-memory tier
    pub memo_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record<V> {
    key: String,
    value: V,
    expires_at: i64,
}

impl<V> Record<V> {
    fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Memoizing key/value cache with a time-to-live
pub struct TtlCache<V> {
    store_dir: PathBuf,
    ttl: Duration,
    lock: LockOptions,
    memo: Option<RwLock<HashMap<String, (V, i64)>>>,
}

impl<V> TtlCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// Create a cache; nothing touches the disk until first use
    pub fn create(options: TtlCacheOptions) -> Self {
        Self {
            store_dir: options.dir.join(&options.prefix),
            ttl: options.ttl,
            lock: options.lock,
            memo: options.memoize.then(|| RwLock::new(HashMap::new())),
        }
    }

    /// Look up a live value in either tier
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = now_ms();

        if let Some(memo) = &self.memo {
            if let Some((value, expires_at)) = memo.read().await.get(key) {
                if now < *expires_at {
                    return Some(value.clone());
                }
            }
        }

        let record = self.read_record(key).await?;
        if let Some(memo) = &self.memo {
            memo.write()
                .await
                .insert(key.to_string(), (record.value.clone(), record.expires_at));
        }
        Some(record.value)
    }

    /// Store a value in both tiers
    pub async fn set(&self, key: &str, value: V) -> DlxResult<()> {
        let expires_at = now_ms().saturating_add(self.ttl.as_millis() as i64);

        if let Some(memo) = &self.memo {
            memo.write()
                .await
                .insert(key.to_string(), (value.clone(), expires_at));
        }

        let record = Record {
            key: key.to_string(),
            value,
            expires_at,
        };
        self.write_record(&record).await
    }

    /// Return the cached value, or compute, store and return it
    ///
    /// A failure to persist the computed value is logged; the value is
    /// still returned and kept in memory.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, compute: F) -> DlxResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DlxResult<V>>,
    {
        if let Some(value) = self.get(key).await {
            debug!("TTL cache hit for {}", key);
            return Ok(value);
        }

        debug!("TTL cache miss for {}", key);
        let value = compute().await?;
        if let Err(e) = self.set(key, value.clone()).await {
            warn!("Failed to persist cached value for {}: {}", key, e);
        }
        Ok(value)
    }

    /// Remove a key from both tiers
    pub async fn delete(&self, key: &str) -> DlxResult<()> {
        if let Some(memo) = &self.memo {
            memo.write().await.remove(key);
        }

        let path = self.record_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DlxError::io(format!("removing {}", path.display()), e)),
        }
    }

    /// Live persistent values whose key matches `pattern`
    ///
    /// A trailing `*` matches any suffix; otherwise the key must be equal.
    pub async fn entries(&self, pattern: &str) -> Vec<(String, V)> {
        let mut matched = vec![];
        let Ok(mut dir) = fs::read_dir(&self.store_dir).await else {
            return matched;
        };

        let now = now_ms();
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Ok(content) = fs::read(&path).await else {
                continue;
            };
            let Ok(record) = serde_json::from_slice::<Record<V>>(&content) else {
                continue;
            };
            if !record.is_expired(now) && matches_pattern(pattern, &record.key) {
                matched.push((record.key, record.value));
            }
        }

        matched.sort_by(|a, b| a.0.cmp(&b.0));
        matched
    }

    /// Clear the in-memory tier, and the persistent tier unless `memo_only`
    pub async fn clear(&self, options: ClearOptions) -> DlxResult<()> {
        if let Some(memo) = &self.memo {
            memo.write().await.clear();
        }
        if options.memo_only {
            return Ok(());
        }

        let mut entries = match fs::read_dir(&self.store_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(DlxError::io(
                    format!("reading {}", self.store_dir.display()),
                    e,
                ))
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DlxError::io("reading ttl cache entry", e))?
        {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(entry.path())
                    .await
                    .map_err(|e| DlxError::io("removing ttl cache entry", e))?;
            }
        }

        Ok(())
    }

    /// Drop the in-memory tier and the cache object; the persistent tier stays
    pub async fn dispose(self) {
        if let Some(memo) = &self.memo {
            memo.write().await.clear();
        }
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.store_dir.join(format!("{}.json", cache_key(key)))
    }

    async fn read_record(&self, key: &str) -> Option<Record<V>> {
        let path = self.record_path(key);
        let content = fs::read(&path).await.ok()?;

        let record: Record<V> = match serde_json::from_slice(&content) {
            Ok(record) => record,
            Err(e) => {
                debug!("Ignoring unreadable ttl record {}: {}", path.display(), e);
                return None;
            }
        };

        // Hash collision or foreign file
        if record.key != key {
            return None;
        }

        if record.is_expired(now_ms()) {
            debug!("TTL record for {} expired", key);
            let _ = fs::remove_file(&path).await;
            return None;
        }

        Some(record)
    }

    async fn write_record(&self, record: &Record<V>) -> DlxResult<()> {
        fs::create_dir_all(&self.store_dir).await.map_err(|e| {
            DlxError::classify_io(
                &self.store_dir,
                format!("creating {}", self.store_dir.display()),
                e,
            )
        })?;

        let path = self.record_path(&record.key);
        let lock_path = path.with_extension("lock");
        let content = serde_json::to_vec(record)?;

        with_lock(&lock_path, &self.lock, || async {
            let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
            fs::write(&tmp, &content)
                .await
                .map_err(|e| DlxError::io(format!("writing {}", tmp.display()), e))?;
            fs::rename(&tmp, &path)
                .await
                .map_err(|e| DlxError::io(format!("writing {}", path.display()), e))
        })
        .await
    }
}

fn matches_pattern(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}
