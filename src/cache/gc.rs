//! Entry enumeration and garbage collection
//!
//! A sweep never fails as a whole: each entry is handled on its own and a
//! failure is logged and skipped.

use crate::cache::entry::{now_ms, CacheEntry, EntryMetadata, EntryState, EntryStore, MetadataRead};
use crate::cache::key::is_cache_key;
use crate::cache::lock::{LockGuard, LockOptions};
use crate::error::{DlxError, DlxResult};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// Summary of one entry for listing
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub key: String,
    pub state: EntryState,
    /// `None` when the entry has no valid timestamp
    pub age: Option<Duration>,
    pub metadata: Option<EntryMetadata>,
}

/// What a sweep would do with one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepDecision {
    Keep,
    /// Age exceeds the maximum (or is unknown)
    Expired,
    /// Unreadable metadata and nothing else in the directory
    Debris,
}

/// Decide the fate of one entry
///
/// A lock younger than `stale_timeout` marks a live writer.
pub async fn inspect(entry: &CacheEntry, max_age: Duration, stale_timeout: Duration) -> SweepDecision {
    // Never pull a directory out from under a live writer
    if entry.is_locked(stale_timeout).await {
        return SweepDecision::Keep;
    }

    match entry.read_metadata().await {
        MetadataRead::Valid(meta) => match meta.age() {
            Some(age) if age <= max_age => SweepDecision::Keep,
            _ => SweepDecision::Expired,
        },
        // A missing or unparsable document may belong to a write in progress
        MetadataRead::Missing | MetadataRead::Corrupt(_) => {
            if entry.is_empty().await {
                SweepDecision::Debris
            } else {
                SweepDecision::Keep
            }
        }
    }
}

/// Keys of every entry directory under the root
pub async fn entry_keys(store: &EntryStore) -> DlxResult<Vec<String>> {
    let mut entries = match fs::read_dir(store.root()).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => {
            return Err(DlxError::io(
                format!("reading cache directory {}", store.root().display()),
                e,
            ))
        }
    };

    let mut keys = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DlxError::io("reading cache entry", e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
        if is_dir && is_cache_key(&name) {
            keys.push(name);
        }
    }

    keys.sort();
    Ok(keys)
}

/// Remove entries older than `max_age`, returning how many were removed
///
/// Entries without a valid timestamp count as infinitely old. Entries with
/// unreadable metadata are removed only when their directory is empty.
pub async fn sweep(store: &EntryStore, max_age: Duration, stale_timeout: Duration) -> usize {
    let keys = match entry_keys(store).await {
        Ok(keys) => keys,
        Err(e) => {
            warn!("Cache sweep skipped: {}", e);
            return 0;
        }
    };

    let mut removed = 0;
    for key in keys {
        let entry = store.entry(&key);
        let decision = inspect(&entry, max_age, stale_timeout).await;
        if decision == SweepDecision::Keep {
            continue;
        }

        match remove_dir(&entry).await {
            Ok(()) => {
                debug!("Removed {:?} cache entry {}", decision, key);
                removed += 1;
            }
            Err(e) => warn!("Failed to remove cache entry {}: {}", key, e),
        }
    }

    info!("Cache sweep removed {} entr(ies)", removed);
    removed
}

/// Enumerate entries with their state and age
pub async fn list_entries(store: &EntryStore, stale_timeout: Duration) -> DlxResult<Vec<EntryInfo>> {
    let now = now_ms();
    let mut infos = vec![];

    for key in entry_keys(store).await? {
        let entry = store.entry(&key);
        let state = entry.state(stale_timeout).await;
        let metadata = entry.read_metadata().await.valid();
        let age = metadata.as_ref().and_then(|m| m.age_at(now));
        infos.push(EntryInfo {
            key,
            state,
            age,
            metadata,
        });
    }

    Ok(infos)
}

/// Remove one entry while holding its lock
///
/// Returns false when the entry did not exist.
pub async fn remove_entry(store: &EntryStore, key: &str, options: &LockOptions) -> DlxResult<bool> {
    let entry = store.entry(key);
    if fs::metadata(entry.dir()).await.is_err() {
        return Ok(false);
    }

    // The guard's lock file lives inside the directory being deleted, so
    // it is removed with it; dropping the guard afterwards is a no-op.
    let guard = LockGuard::acquire(&entry.lock_path(), options).await?;
    let result = remove_dir(&entry).await;
    drop(guard);
    result?;

    info!("Removed cache entry {}", key);
    Ok(true)
}

/// Remove every entry not held by a live writer, returning how many were
/// removed
pub async fn clear(store: &EntryStore, stale_timeout: Duration) -> DlxResult<usize> {
    let mut removed = 0;
    for key in entry_keys(store).await? {
        let entry = store.entry(&key);
        if entry.is_locked(stale_timeout).await {
            info!("Skipping locked cache entry {}", key);
            continue;
        }
        match remove_dir(&entry).await {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove cache entry {}: {}", key, e),
        }
    }
    Ok(removed)
}

async fn remove_dir(entry: &CacheEntry) -> DlxResult<()> {
    match fs::remove_dir_all(entry.dir()).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DlxError::classify_io(
            entry.dir(),
            format!("removing {}", entry.dir().display()),
            e,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::Source;
    use crate::cache::key::cache_key;
    use tempfile::TempDir;

    const STALE: Duration = Duration::from_secs(5);

    async fn published_entry(store: &EntryStore, spec: &str, age: Duration) -> CacheEntry {
        let entry = store.entry(&cache_key(spec));
        entry.ensure_dir().await.unwrap();
        std::fs::write(entry.file_payload("bin"), b"payload").unwrap();

        let mut meta = EntryMetadata::new(entry.key(), "x".to_string(), 7, Source::download(spec));
        meta.timestamp = Some(now_ms() - age.as_millis() as i64);
        entry.write_metadata(&meta).await.unwrap();
        entry
    }

    #[tokio::test]
    async fn sweep_removes_expired_keeps_fresh() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path());

        let old = published_entry(&store, "old", Duration::from_secs(3600)).await;
        let fresh = published_entry(&store, "fresh", Duration::from_secs(1)).await;

        let removed = sweep(&store, Duration::from_secs(60), STALE).await;

        assert_eq!(removed, 1);
        assert!(!old.dir().exists());
        assert!(fresh.dir().exists());
    }

    #[tokio::test]
    async fn sweep_isolates_unreadable_metadata() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path());

        let expired = published_entry(&store, "expired", Duration::from_secs(3600)).await;

        let unreadable = store.entry(&cache_key("unreadable"));
        unreadable.ensure_dir().await.unwrap();
        std::fs::write(unreadable.metadata_path(), b"{ not json").unwrap();

        let removed = sweep(&store, Duration::from_secs(60), STALE).await;

        assert_eq!(removed, 1);
        assert!(!expired.dir().exists());
        assert!(unreadable.metadata_path().exists());
    }

    #[tokio::test]
    async fn sweep_removes_empty_debris() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path());

        let empty = store.entry(&cache_key("empty"));
        empty.ensure_dir().await.unwrap();

        assert_eq!(inspect(&empty, Duration::from_secs(60), STALE).await, SweepDecision::Debris);
        assert_eq!(sweep(&store, Duration::from_secs(60), STALE).await, 1);
        assert!(!empty.dir().exists());
    }

    #[tokio::test]
    async fn sweep_treats_missing_timestamp_as_expired() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path());
        let entry = store.entry(&cache_key("no-timestamp"));
        entry.ensure_dir().await.unwrap();
        std::fs::write(
            entry.metadata_path(),
            format!(r#"{{"cache_key": "{}", "timestamp": "soon"}}"#, entry.key()),
        )
        .unwrap();

        assert_eq!(
            inspect(&entry, Duration::from_secs(u64::MAX / 4), STALE).await,
            SweepDecision::Expired
        );
    }

    #[tokio::test]
    async fn sweep_skips_locked_entries() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path());
        let entry = published_entry(&store, "refreshing", Duration::from_secs(3600)).await;
        std::fs::write(entry.lock_path(), "1\ntoken\n").unwrap();

        assert_eq!(sweep(&store, Duration::from_secs(60), STALE).await, 0);
        assert!(entry.dir().exists());
    }

    #[tokio::test]
    async fn sweep_ignores_foreign_directories() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path());
        std::fs::create_dir(temp.path().join("not-an-entry")).unwrap();
        std::fs::write(temp.path().join("stray-file"), b"").unwrap();

        assert_eq!(sweep(&store, Duration::ZERO, STALE).await, 0);
        assert!(temp.path().join("not-an-entry").exists());
    }

    #[tokio::test]
    async fn sweep_on_missing_root_is_noop() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path().join("missing"));
        assert_eq!(sweep(&store, Duration::ZERO, STALE).await, 0);
    }

    #[tokio::test]
    async fn list_and_remove() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path());
        let entry = published_entry(&store, "listed", Duration::from_secs(10)).await;

        let infos = list_entries(&store, Duration::from_secs(5)).await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].state, EntryState::Published);
        assert!(infos[0].age.unwrap() >= Duration::from_secs(10));

        let options = LockOptions::default();
        assert!(remove_entry(&store, entry.key(), &options).await.unwrap());
        assert!(!entry.dir().exists());
        assert!(!remove_entry(&store, entry.key(), &options).await.unwrap());
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path());
        published_entry(&store, "a", Duration::ZERO).await;
        published_entry(&store, "b", Duration::ZERO).await;

        assert_eq!(clear(&store, STALE).await.unwrap(), 2);
        assert!(entry_keys(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_honors_configured_stale_timeout() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path());
        let entry = published_entry(&store, "slow-writer", Duration::from_secs(3600)).await;
        std::fs::write(entry.lock_path(), "1\ntoken\n").unwrap();
        let file = std::fs::File::options().write(true).open(entry.lock_path()).unwrap();
        file.set_modified(std::time::SystemTime::now() - Duration::from_secs(10)).unwrap();

        let stale = Duration::from_secs(60);
        let infos = list_entries(&store, stale).await.unwrap();
        assert_eq!(infos[0].state, EntryState::Writing);

        assert_eq!(
            inspect(&entry, Duration::from_secs(60), stale).await,
            SweepDecision::Keep
        );
        assert_eq!(sweep(&store, Duration::from_secs(60), stale).await, 0);
        assert!(entry.dir().exists());

        // Past the stale timeout the abandoned entry goes
        assert_eq!(sweep(&store, Duration::from_secs(60), Duration::from_secs(5)).await, 1);
        assert!(!entry.dir().exists());
    }

    #[tokio::test]
    async fn clear_skips_locked_entries() {
        let temp = TempDir::new().unwrap();
        let store = EntryStore::new(temp.path());
        published_entry(&store, "idle", Duration::ZERO).await;
        let busy = published_entry(&store, "busy", Duration::ZERO).await;
        std::fs::write(busy.lock_path(), "1\ntoken\n").unwrap();

        assert_eq!(clear(&store, STALE).await.unwrap(), 1);
        assert!(busy.dir().exists());
        assert_eq!(entry_keys(&store).await.unwrap(), vec![busy.key().to_string()]);
    }
}
