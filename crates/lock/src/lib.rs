//! Cross-process advisory locking
//!
//! Provides mutual exclusion over a named resource shared by unrelated OS
//! processes (e.g., two simultaneous CLI invocations downloading the same
//! binary). In-memory primitives cannot span process boundaries, so the
//! lock is a sentinel file created with create-if-absent semantics.
//!
//! While the lock is held, a background heartbeat refreshes the file's
//! timestamp so waiters do not reclaim a lock whose holder is merely slow.
//! A lock file whose last touch is older than the staleness threshold is
//! treated as abandoned by a crashed holder and forcibly reclaimed.
//!
//! # Stale Lock Reclaim
//!
//! A holder whose heartbeat is delayed past the staleness threshold (e.g.
//! by process suspension) may be reclaimed while still alive, briefly
//! allowing two holders. This is an accepted risk, not compensated for:
//! heartbeats (default 2s) are much shorter than the staleness threshold
//! (default 5s).

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default staleness threshold.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5);

/// Default heartbeat interval.
pub const DEFAULT_TOUCH_INTERVAL: Duration = Duration::from_secs(2);

/// Default acquisition timeout. Far above any reasonable download; exists
/// so a wedged filesystem cannot hang a CLI forever.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(600);

/// Initial lock-wait poll interval; doubles up to [`MAX_POLL_INTERVAL`].
const INITIAL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound for the lock-wait poll interval.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors for lock operations
#[derive(Debug, Error)]
pub enum LockError {
    /// Lock acquisition timed out
    #[error("Lock acquisition timed out for {} after {timeout_secs}s", path.display())]
    Timeout {
        /// Lock file path
        path: PathBuf,
        /// Configured timeout in seconds
        timeout_secs: u64,
    },

    /// Lock file IO error
    #[error("Lock file error for {}: {source}", path.display())]
    Io {
        /// Lock file path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Lock is held by another process
    #[error("Lock held by process {pid} (last touched {age_ms}ms ago)")]
    HeldByOther {
        /// PID recorded in the lock file
        pid: u32,
        /// Milliseconds since the holder's last heartbeat
        age_ms: u64,
    },
}

/// Lock holder state stored in the lock file.
///
/// Serialized as `pid:owner:touched_at_ms`; the heartbeat rewrites the
/// file with a fresh `touched_at` while the lock is held.
#[derive(Debug, Clone)]
pub struct LockState {
    /// Process ID that holds the lock
    pub pid: u32,
    /// Unique token identifying the holder
    pub owner: Uuid,
    /// Last heartbeat, in milliseconds since the epoch
    pub touched_at: u64,
}

impl LockState {
    fn serialize(&self) -> String {
        format!("{}:{}:{}", self.pid, self.owner, self.touched_at)
    }

    fn deserialize(s: &str) -> Option<Self> {
        let mut parts = s.trim().splitn(3, ':');
        Some(Self {
            pid: parts.next()?.parse().ok()?,
            owner: parts.next()?.parse().ok()?,
            touched_at: parts.next()?.parse().ok()?,
        })
    }
}

/// Configuration for a cross-process lock
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Age past which a lock file is treated as abandoned
    pub stale_after: Duration,
    /// Heartbeat interval while the lock is held
    pub touch_interval: Duration,
    /// Maximum time to wait for acquisition
    pub timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            touch_interval: DEFAULT_TOUCH_INTERVAL,
            timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

/// A cross-process advisory lock backed by a sentinel file.
///
/// At most one holder performs the protected operation at a time, modulo
/// the staleness caveat documented at the crate level. No ordering is
/// guaranteed among multiple waiters.
#[derive(Debug, Clone)]
pub struct CrossProcessLock {
    path: PathBuf,
    config: LockConfig,
}

impl CrossProcessLock {
    /// Create a lock over the given sentinel file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: LockConfig::default(),
        }
    }

    /// Use a custom configuration.
    #[must_use]
    pub fn with_config(mut self, config: LockConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the staleness threshold.
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.config.stale_after = stale_after;
        self
    }

    /// Set the acquisition timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// The sentinel file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the lock file currently exists.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.path.exists()
    }

    /// Read the current holder's state, if any.
    #[must_use]
    pub fn holder(&self) -> Option<LockState> {
        read_lock_state(&self.path)
    }

    /// Acquire the lock, waiting for release or staleness.
    ///
    /// Waiters poll with a doubling interval. A lock file whose last touch
    /// exceeds the staleness threshold is removed and acquisition retried.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if the lock cannot be acquired within
    /// the configured timeout, or [`LockError::Io`] if the filesystem
    /// operation itself fails (the caller must not proceed unlocked).
    pub async fn acquire(&self) -> Result<LockGuard, LockError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| LockError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        }

        let start = Instant::now();
        let mut poll_interval = INITIAL_POLL_INTERVAL;
        let owner = Uuid::new_v4();

        loop {
            let state = LockState {
                pid: std::process::id(),
                owner,
                touched_at: now_ms(),
            };

            match try_create(&self.path, &state) {
                Ok(()) => {
                    debug!(path = %self.path.display(), %owner, "Acquired lock");
                    return Ok(LockGuard::new(self.path.clone(), owner, &self.config));
                }
                Err(LockError::HeldByOther { pid, age_ms }) => {
                    if Duration::from_millis(age_ms) > self.config.stale_after {
                        warn!(
                            path = %self.path.display(),
                            holder_pid = pid,
                            age_ms,
                            "Breaking stale lock"
                        );
                        // Remove the abandoned lock and retry immediately
                        let _ = fs::remove_file(&self.path);
                        continue;
                    }

                    if start.elapsed() >= self.config.timeout {
                        return Err(LockError::Timeout {
                            path: self.path.clone(),
                            timeout_secs: self.config.timeout.as_secs(),
                        });
                    }

                    debug!(
                        path = %self.path.display(),
                        holder_pid = pid,
                        "Lock held by another process, waiting"
                    );
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(poll_interval).await;
            poll_interval = (poll_interval * 2).min(MAX_POLL_INTERVAL);
        }
    }

    /// Try to acquire the lock without waiting.
    ///
    /// Must be called within a Tokio runtime: the guard's heartbeat task
    /// is spawned immediately.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::HeldByOther`] if another holder has the lock,
    /// or [`LockError::Io`] on filesystem failure.
    pub fn try_acquire(&self) -> Result<LockGuard, LockError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| LockError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        }
        let owner = Uuid::new_v4();
        let state = LockState {
            pid: std::process::id(),
            owner,
            touched_at: now_ms(),
        };
        try_create(&self.path, &state)?;
        Ok(LockGuard::new(self.path.clone(), owner, &self.config))
    }
}

fn try_create(path: &Path, state: &LockState) -> Result<(), LockError> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(state.serialize().as_bytes())
                .map_err(|e| LockError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if let Some(existing) = read_lock_state(path) {
                let age_ms = now_ms().saturating_sub(existing.touched_at);
                Err(LockError::HeldByOther {
                    pid: existing.pid,
                    age_ms,
                })
            } else {
                // Unreadable lock file: drop it and report as held so the
                // caller's loop retries the creation race cleanly
                let _ = fs::remove_file(path);
                Err(LockError::HeldByOther { pid: 0, age_ms: 0 })
            }
        }
        Err(e) => Err(LockError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn read_lock_state(path: &Path) -> Option<LockState> {
    let contents = fs::read_to_string(path).ok()?;
    LockState::deserialize(&contents)
}

fn now_ms() -> u64 {
    // System time before the UNIX epoch is practically impossible on
    // modern systems; fall back to 0 rather than panic
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Guard that keeps the lock alive and releases it when dropped.
///
/// While the guard lives, a background heartbeat rewrites the lock file
/// every `touch_interval` so waiters do not reclaim a legitimately held
/// lock. Dropping the guard stops the heartbeat and deletes the lock file
/// on every exit path, success, error, or cancellation alike.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    owner: Uuid,
    heartbeat: tokio::task::JoinHandle<()>,
}

impl LockGuard {
    fn new(path: PathBuf, owner: Uuid, config: &LockConfig) -> Self {
        let heartbeat_path = path.clone();
        let touch_interval = config.touch_interval;
        let heartbeat = tokio::spawn(async move {
            let pid = std::process::id();
            loop {
                tokio::time::sleep(touch_interval).await;
                let state = LockState {
                    pid,
                    owner,
                    touched_at: now_ms(),
                };
                if let Err(e) = fs::write(&heartbeat_path, state.serialize()) {
                    warn!(
                        path = %heartbeat_path.display(),
                        error = %e,
                        "Failed to touch lock file"
                    );
                }
            }
        });
        Self {
            path,
            owner,
            heartbeat,
        }
    }

    /// The holder's unique token.
    #[must_use]
    pub fn owner(&self) -> Uuid {
        self.owner
    }

    /// Explicitly release the lock.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.heartbeat.abort();
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to release lock"
                );
            }
        } else {
            debug!(path = %self.path.display(), "Released lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lock_in(tmp: &TempDir, name: &str) -> CrossProcessLock {
        CrossProcessLock::new(tmp.path().join(name))
    }

    #[test]
    fn test_lock_state_round_trip() {
        let state = LockState {
            pid: 12345,
            owner: Uuid::new_v4(),
            touched_at: 1_234_567_890_123,
        };
        let parsed = LockState::deserialize(&state.serialize()).unwrap();
        assert_eq!(parsed.pid, 12345);
        assert_eq!(parsed.owner, state.owner);
        assert_eq!(parsed.touched_at, 1_234_567_890_123);
    }

    #[test]
    fn test_lock_state_rejects_garbage() {
        assert!(LockState::deserialize("").is_none());
        assert!(LockState::deserialize("not a lock").is_none());
        assert!(LockState::deserialize("1:2").is_none());
    }

    #[tokio::test]
    async fn test_try_acquire_excludes_second_holder() {
        let tmp = TempDir::new().unwrap();
        let lock = lock_in(&tmp, "entry.lock");

        let guard = lock.try_acquire().unwrap();
        assert!(lock.is_locked());

        let second = lock.try_acquire();
        assert!(matches!(second, Err(LockError::HeldByOther { .. })));

        drop(guard);
        assert!(!lock.is_locked());

        let _guard2 = lock.try_acquire().unwrap();
        assert!(lock.is_locked());
    }

    #[tokio::test]
    async fn test_different_paths_do_not_block_each_other() {
        let tmp = TempDir::new().unwrap();
        let a = lock_in(&tmp, "a.lock");
        let b = lock_in(&tmp, "b.lock");

        let _ga = a.try_acquire().unwrap();
        let _gb = b.try_acquire().unwrap();
        assert!(a.is_locked());
        assert!(b.is_locked());
    }

    #[tokio::test]
    async fn test_holder_state_is_recorded() {
        let tmp = TempDir::new().unwrap();
        let lock = lock_in(&tmp, "entry.lock");

        let guard = lock.try_acquire().unwrap();
        let holder = lock.holder().unwrap();
        assert_eq!(holder.pid, std::process::id());
        assert_eq!(holder.owner, guard.owner());
        assert!(holder.touched_at > 0);
    }

    #[tokio::test]
    async fn test_release_on_drop() {
        let tmp = TempDir::new().unwrap();
        let lock = lock_in(&tmp, "entry.lock");
        {
            let _guard = lock.try_acquire().unwrap();
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let tmp = TempDir::new().unwrap();
        let lock = lock_in(&tmp, "entry.lock");

        let guard = lock.try_acquire().unwrap();
        let waiter = lock.clone();
        let handle = tokio::spawn(async move { waiter.acquire().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(guard);

        let acquired = handle.await.unwrap();
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_times_out() {
        let tmp = TempDir::new().unwrap();
        let lock = lock_in(&tmp, "entry.lock").with_timeout(Duration::from_millis(150));

        let _guard = lock.try_acquire().unwrap();
        let result = lock.acquire().await;
        assert!(matches!(result, Err(LockError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_stale_lock_is_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("entry.lock");

        // Simulate a crashed holder: lock file with an ancient heartbeat
        let dead = LockState {
            pid: 99999,
            owner: Uuid::new_v4(),
            touched_at: now_ms().saturating_sub(60_000),
        };
        fs::write(&path, dead.serialize()).unwrap();

        let lock = CrossProcessLock::new(&path).with_stale_after(Duration::from_secs(5));
        let guard = lock.acquire().await.unwrap();
        assert_ne!(lock.holder().unwrap().pid, 99999);
        drop(guard);
    }

    #[tokio::test]
    async fn test_corrupt_lock_file_is_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("entry.lock");
        fs::write(&path, "garbage").unwrap();

        let lock = CrossProcessLock::new(&path);
        let guard = lock.acquire().await.unwrap();
        assert!(lock.holder().is_some());
        drop(guard);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_touched_at() {
        let tmp = TempDir::new().unwrap();
        let lock = lock_in(&tmp, "entry.lock").with_config(LockConfig {
            stale_after: Duration::from_millis(500),
            touch_interval: Duration::from_millis(50),
            timeout: Duration::from_secs(1),
        });

        let _guard = lock.try_acquire().unwrap();
        let first = lock.holder().unwrap().touched_at;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let second = lock.holder().unwrap().touched_at;
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_slow_holder_is_not_reclaimed_while_heartbeating() {
        let tmp = TempDir::new().unwrap();
        let config = LockConfig {
            stale_after: Duration::from_millis(300),
            touch_interval: Duration::from_millis(50),
            timeout: Duration::from_millis(600),
        };
        let lock = lock_in(&tmp, "entry.lock").with_config(config.clone());

        // Holder outlives the staleness threshold thanks to its heartbeat
        let guard = lock.try_acquire().unwrap();
        let waiter = lock.clone();
        let waited = tokio::spawn(async move { waiter.acquire().await });
        tokio::time::sleep(Duration::from_millis(450)).await;

        assert!(!waited.is_finished() || waited.await.unwrap().is_err());
        drop(guard);
    }
}
