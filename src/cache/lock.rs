//! Cross-process lock backed by a lock file
//!
//! The lock file is created with `create_new`, so exactly one process can
//! hold it. The holder refreshes the file's mtime on a heartbeat; waiters
//! treat a lock whose mtime is older than `stale_timeout` as abandoned and
//! reclaim it. Release is tied to [`LockGuard`]'s `Drop`, which also runs
//! when the critical section errors, panics, or its future is dropped.

use crate::error::{DlxError, DlxResult};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// File name of the lock inside a cache entry directory
pub const LOCK_FILE: &str = ".dlx.lock";

const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Lock timing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Age after which an untouched lock file is considered abandoned
    pub stale_timeout: Duration,
    /// Maximum time to wait for the lock
    pub lock_timeout: Duration,
    /// Interval between mtime refreshes while the lock is held
    pub touch_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            stale_timeout: Duration::from_millis(5_000),
            lock_timeout: Duration::from_millis(120_000),
            touch_interval: Duration::from_millis(2_000),
        }
    }
}

/// Run `critical_section` while holding the lock at `lock_path`
///
/// The lock is released on every exit path before the section's result
/// (or error) is returned.
pub async fn with_lock<F, Fut, T>(
    lock_path: &Path,
    options: &LockOptions,
    critical_section: F,
) -> DlxResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = DlxResult<T>>,
{
    let guard = LockGuard::acquire(lock_path, options).await?;
    let result = critical_section().await;
    guard.release();
    result
}

/// A held lock; dropping it stops the heartbeat and removes the lock file
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    token: String,
    heartbeat: Option<JoinHandle<()>>,
}

impl LockGuard {
    /// Acquire the lock, polling with backoff until `lock_timeout`
    pub async fn acquire(lock_path: &Path, options: &LockOptions) -> DlxResult<Self> {
        let token = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut delay = INITIAL_BACKOFF;

        loop {
            match try_create(lock_path, &token).await {
                Ok(()) => {
                    debug!("Acquired lock {}", lock_path.display());
                    let heartbeat = spawn_heartbeat(lock_path.to_path_buf(), options.touch_interval);
                    return Ok(Self {
                        path: lock_path.to_path_buf(),
                        token,
                        heartbeat: Some(heartbeat),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if reclaim_if_stale(lock_path, options.stale_timeout).await {
                        continue;
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    // Parent directory missing
                    if let Some(parent) = lock_path.parent() {
                        fs::create_dir_all(parent).await.map_err(|e| {
                            DlxError::classify_io(
                                parent,
                                format!("creating lock directory {}", parent.display()),
                                e,
                            )
                        })?;
                        continue;
                    }
                    return Err(DlxError::io(
                        format!("creating lock file {}", lock_path.display()),
                        e,
                    ));
                }
                Err(e) => {
                    return Err(DlxError::classify_io(
                        lock_path,
                        format!("creating lock file {}", lock_path.display()),
                        e,
                    ));
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= options.lock_timeout {
                return Err(DlxError::LockTimeout {
                    path: lock_path.to_path_buf(),
                    waited_ms: elapsed.as_millis() as u64,
                });
            }

            let remaining = options.lock_timeout - elapsed;
            tokio::time::sleep(delay.min(remaining)).await;
            delay = (delay * 2).min(MAX_BACKOFF);
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock now
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }

        // A stale-reclaimed lock now belongs to someone else; leave it alone
        match std::fs::read_to_string(&self.path) {
            Ok(content) if owner_token(&content) == Some(self.token.as_str()) => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!("Failed to remove lock {}: {}", self.path.display(), e);
                } else {
                    debug!("Released lock {}", self.path.display());
                }
            }
            Ok(_) => warn!(
                "Lock {} was reclaimed by another process",
                self.path.display()
            ),
            Err(_) => {}
        }
    }
}

async fn try_create(lock_path: &Path, token: &str) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
        .await?;

    let content = format!("{}\n{}\n", std::process::id(), token);
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Owner token is the second line of the lock file
fn owner_token(content: &str) -> Option<&str> {
    content.lines().nth(1).map(str::trim)
}

/// Age of the lock file, `None` if it vanished
async fn lock_age(lock_path: &Path) -> Option<Duration> {
    let meta = fs::metadata(lock_path).await.ok()?;
    let modified = meta.modified().or_else(|_| meta.created()).ok()?;
    // mtime in the future (clock skew) counts as fresh
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}

/// Remove an abandoned lock. Returns true when the caller should retry
/// creation immediately.
///
/// The removal itself happens only while holding the reclaim marker, after
/// re-checking staleness under it, so a lock re-created by a concurrent
/// reclaimer is never deleted.
async fn reclaim_if_stale(lock_path: &Path, stale_timeout: Duration) -> bool {
    match lock_age(lock_path).await {
        // Released between our create attempt and the stat
        None => return true,
        Some(age) if age <= stale_timeout => return false,
        Some(_) => {}
    }

    let marker = reclaim_marker(lock_path);
    if let Err(e) = try_create(&marker, "reclaim").await {
        if e.kind() == ErrorKind::AlreadyExists {
            clear_abandoned_marker(&marker, stale_timeout).await;
        }
        return false;
    }

    let reclaimed = match lock_age(lock_path).await {
        None => true,
        Some(age) if age <= stale_timeout => false,
        Some(age) => {
            warn!(
                "Reclaiming stale lock {} (untouched for {}ms)",
                lock_path.display(),
                age.as_millis()
            );
            match fs::remove_file(lock_path).await {
                Ok(()) => true,
                Err(e) if e.kind() == ErrorKind::NotFound => true,
                Err(e) => {
                    debug!("Failed to remove stale lock {}: {}", lock_path.display(), e);
                    false
                }
            }
        }
    };

    if let Err(e) = fs::remove_file(&marker).await {
        debug!("Failed to remove reclaim marker {}: {}", marker.display(), e);
    }
    reclaimed
}

/// `<lock>.reclaim`, held for the duration of one stale-lock removal
fn reclaim_marker(lock_path: &Path) -> PathBuf {
    let mut name = lock_path.as_os_str().to_owned();
    name.push(".reclaim");
    PathBuf::from(name)
}

/// A marker outliving the stale timeout belongs to a reclaimer that died
async fn clear_abandoned_marker(marker: &Path, stale_timeout: Duration) {
    if lock_age(marker).await.is_some_and(|age| age > stale_timeout) {
        warn!("Removing abandoned reclaim marker {}", marker.display());
        let _ = fs::remove_file(marker).await;
    }
}

fn spawn_heartbeat(path: PathBuf, touch_interval: Duration) -> JoinHandle<()> {
    // interval() panics on a zero period
    let touch_interval = touch_interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(touch_interval);
        // First tick completes immediately; the file was just written
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = touch(&path).await {
                debug!("Lock heartbeat failed for {}: {}", path.display(), e);
            }
        }
    })
}

async fn touch(path: &Path) -> std::io::Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path).await?;
    let file = file.into_std().await;
    file.set_modified(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn fast_options() -> LockOptions {
        LockOptions {
            stale_timeout: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(5),
            touch_interval: Duration::from_millis(50),
        }
    }

    fn backdate(path: &Path, by: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[tokio::test]
    async fn acquires_and_releases() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join(LOCK_FILE);

        let value = with_lock(&lock, &fast_options(), || async {
            assert!(lock.exists());
            Ok(42)
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn creates_missing_parent() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join("a").join("b").join(LOCK_FILE);

        with_lock(&lock, &fast_options(), || async { Ok(()) })
            .await
            .unwrap();
        assert!(lock.parent().unwrap().is_dir());
    }

    #[tokio::test]
    async fn releases_on_error() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join(LOCK_FILE);

        let result: DlxResult<()> = with_lock(&lock, &fast_options(), || async {
            Err(DlxError::Internal("critical section failed".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert!(!lock.exists());

        // Next acquirer needs no manual cleanup
        with_lock(&lock, &fast_options(), || async { Ok(()) })
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn releases_on_panic() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join(LOCK_FILE);

        let task_lock = lock.clone();
        let handle = tokio::spawn(async move {
            with_lock(&task_lock, &fast_options(), || async {
                if task_lock.exists() {
                    panic!("holder crashed");
                }
                Ok::<(), DlxError>(())
            })
            .await
        });

        assert!(handle.await.is_err());
        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn reclaims_stale_lock() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join(LOCK_FILE);
        std::fs::write(&lock, "99999\nabandoned-token\n").unwrap();
        backdate(&lock, Duration::from_secs(60));

        let options = LockOptions {
            lock_timeout: Duration::from_secs(1),
            ..fast_options()
        };
        with_lock(&lock, &options, || async { Ok(()) })
            .await
            .unwrap();

        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn times_out_on_live_lock() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join(LOCK_FILE);
        std::fs::write(&lock, "99999\nother-token\n").unwrap();

        let options = LockOptions {
            stale_timeout: Duration::from_secs(60),
            lock_timeout: Duration::from_millis(200),
            touch_interval: Duration::from_millis(50),
        };
        let err = with_lock(&lock, &options, || async { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, DlxError::LockTimeout { .. }));
        // Someone else's lock is untouched
        assert!(lock.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn heartbeat_refreshes_mtime() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join(LOCK_FILE);

        with_lock(&lock, &fast_options(), || async {
            backdate(&lock, Duration::from_secs(60));
            tokio::time::sleep(Duration::from_millis(300)).await;

            let age = lock_age(&lock).await.unwrap();
            assert!(age < Duration::from_secs(5), "lock age {:?}", age);
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn leaves_foreign_lock_on_release() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join(LOCK_FILE);

        let guard = LockGuard::acquire(&lock, &fast_options()).await.unwrap();
        std::fs::write(&lock, "1\nsomeone-else\n").unwrap();
        guard.release();

        assert!(lock.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn mutual_exclusion() {
        let dir = TempDir::new().unwrap();
        let lock = Arc::new(dir.path().join(LOCK_FILE));
        let inside = Arc::new(AtomicBool::new(false));
        let entered = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                let entered = Arc::clone(&entered);
                tokio::spawn(async move {
                    with_lock(&lock, &fast_options(), || async {
                        assert!(!inside.swap(true, Ordering::SeqCst));
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        inside.store(false, Ordering::SeqCst);
                        entered.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
                })
            })
            .collect();

        for result in futures_util::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }
        assert_eq!(entered.load(Ordering::SeqCst), 6);
        assert!(!lock.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reclaim_admits_one_holder() {
        let dir = TempDir::new().unwrap();
        let lock = Arc::new(dir.path().join(LOCK_FILE));
        let options = LockOptions {
            lock_timeout: Duration::from_secs(30),
            ..fast_options()
        };

        for round in 0..10 {
            std::fs::write(&*lock, "99999\nabandoned-token\n").unwrap();
            backdate(&lock, Duration::from_secs(60));

            let inside = Arc::new(AtomicUsize::new(0));
            let most = Arc::new(AtomicUsize::new(0));
            let tasks: Vec<_> = (0..8)
                .map(|_| {
                    let lock = Arc::clone(&lock);
                    let inside = Arc::clone(&inside);
                    let most = Arc::clone(&most);
                    tokio::spawn(async move {
                        with_lock(&lock, &options, || async {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            most.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await
                    })
                })
                .collect();

            for result in futures_util::future::join_all(tasks).await {
                result.unwrap().unwrap();
            }
            assert_eq!(most.load(Ordering::SeqCst), 1, "round {}", round);
            assert!(!lock.exists());
            assert!(!reclaim_marker(&lock).exists());
        }
    }

    #[tokio::test]
    async fn abandoned_reclaim_marker_is_cleared() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join(LOCK_FILE);
        std::fs::write(&lock, "99999\nabandoned-token\n").unwrap();
        backdate(&lock, Duration::from_secs(60));
        let marker = reclaim_marker(&lock);
        std::fs::write(&marker, "99999\nreclaim\n").unwrap();
        backdate(&marker, Duration::from_secs(60));

        with_lock(&lock, &fast_options(), || async { Ok(()) })
            .await
            .unwrap();
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn zero_touch_interval_keeps_heartbeat_alive() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join(LOCK_FILE);
        let options = LockOptions {
            touch_interval: Duration::ZERO,
            ..fast_options()
        };

        let guard = LockGuard::acquire(&lock, &options).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!guard.heartbeat.as_ref().unwrap().is_finished());
        guard.release();
        assert!(!lock.exists());
    }
}
