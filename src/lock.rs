//! Cooperative, timeout-bounded mutual exclusion for named resources.
//!
//! The backend is chosen once from configuration: advisory file locks for a
//! single host, or owner-tagged lock records in the shared cache database.
//! Acquisition polls until a deadline and reports failure as `None`; callers
//! decide what an unavailable lock means for them.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::cache::SharedCache;
use crate::config::LockBackendKind;
use crate::error::StorageError;

pub enum LockBackend {
    LocalFile { dir: PathBuf },
    Shared { cache: SharedCache },
}

impl LockBackend {
    pub fn kind(&self) -> LockBackendKind {
        match self {
            LockBackend::LocalFile { .. } => LockBackendKind::LocalFile,
            LockBackend::Shared { .. } => LockBackendKind::Shared,
        }
    }
}

pub struct LockManager {
    backend: LockBackend,
    timeout: Duration,
    poll_interval: Duration,
}

/// Stable lock name for a resource key.
pub fn lock_name(resource_key: &str) -> String {
    let digest = blake3::hash(resource_key.as_bytes());
    format!("nattevakt_{}", &digest.to_hex()[..32])
}

impl LockManager {
    pub fn new(backend: LockBackend, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            backend,
            timeout,
            poll_interval,
        }
    }

    pub fn backend_kind(&self) -> LockBackendKind {
        self.backend.kind()
    }

    /// Wait up to the configured timeout for exclusive ownership of
    /// `resource_key`. Backend I/O errors are logged and reported as `None`.
    pub async fn acquire(&self, resource_key: &str) -> Option<LockHandle> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.try_acquire(resource_key) {
                Ok(Some(handle)) => {
                    debug!(resource = resource_key, "Lock acquired");
                    return Some(handle);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(resource = resource_key, error = %e, "Lock backend error");
                    return None;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    resource = resource_key,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Timed out waiting for lock"
                );
                return None;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Single non-blocking attempt.
    pub fn try_acquire(&self, resource_key: &str) -> Result<Option<LockHandle>, StorageError> {
        let name = lock_name(resource_key);
        let held = match &self.backend {
            LockBackend::LocalFile { dir } => try_lock_file(dir, &name)?,
            LockBackend::Shared { cache } => {
                let token = hex::encode(rand::random::<[u8; 16]>());
                if cache.try_claim_lock(&name, &token)? {
                    Some(HeldLock::Shared {
                        cache: cache.clone(),
                        name,
                        token,
                    })
                } else {
                    None
                }
            }
        };
        Ok(held.map(|held| LockHandle {
            resource: resource_key.to_string(),
            held: Some(held),
        }))
    }
}

fn try_lock_file(dir: &Path, name: &str) -> Result<Option<HeldLock>, StorageError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.lock", name));
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)?;
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(Some(HeldLock::File { file, path })),
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e.into()),
    }
}

enum HeldLock {
    // The lock file is left in place on release: unlinking it would let a
    // waiter holding the old inode and a newcomer on a fresh file both win.
    File {
        file: File,
        path: PathBuf,
    },
    Shared {
        cache: SharedCache,
        name: String,
        token: String,
    },
}

/// Exclusive ownership of a resource. Released explicitly or on drop.
pub struct LockHandle {
    resource: String,
    held: Option<HeldLock>,
}

impl LockHandle {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Release ownership. Returns false when already released.
    pub fn release(&mut self) -> bool {
        let Some(held) = self.held.take() else {
            return false;
        };
        match held {
            HeldLock::File { file, path } => {
                if let Err(e) = FileExt::unlock(&file) {
                    warn!(path = %path.display(), error = %e, "Failed to unlock lock file");
                }
            }
            HeldLock::Shared { cache, name, token } => match cache.release_lock(&name, &token) {
                Ok(true) => {}
                Ok(false) => warn!(lock = %name, "Shared lock was no longer owned at release"),
                Err(e) => warn!(lock = %name, error = %e, "Failed to release shared lock"),
            },
        }
        debug!(resource = %self.resource, "Lock released");
        true
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}
