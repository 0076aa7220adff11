//! Durable sled-backed shared cache.
//!
//! Holds every piece of cross-run state: the rate counter, circuit state, the
//! cached context bundle, the offline news snapshot, shared lock records and
//! the installation secret. Values are JSON envelopes carrying an optional
//! expiry; expired entries read as absent and are removed lazily.
//!
//! sled admits one process per database. [`CacheStore`] therefore opens the
//! database per session: callers in one process share the live handle, and a
//! second process waits (bounded) until the first has closed it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::{Db, IVec, Tree};
use tracing::debug;

use crate::error::StorageError;

const TREE_ENTRIES: &str = "cache_entries";
const TREE_LOCKS: &str = "cache_locks";
const TREE_META: &str = "cache_meta";
const KEY_INSTALLATION_SECRET: &str = "installation_secret";

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    expires_at_ms: Option<u64>,
    value: serde_json::Value,
}

impl Envelope {
    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms.map_or(true, |exp| exp > now_ms)
    }
}

struct CacheInner {
    db: Db,
    entries: Tree,
    locks: Tree,
    meta: Tree,
}

/// Handle on an open cache database. Clones share the handle; the database
/// closes when the last clone is dropped.
#[derive(Clone)]
pub struct SharedCache {
    inner: Arc<CacheInner>,
}

impl SharedCache {
    /// Open (or create) the cache database under `path`. Fails with
    /// [`StorageError::Busy`] while another process has it open.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(path)?;
        let db = sled::open(path).map_err(|e| open_error(path, e))?;
        Self::from_db(db)
    }

    /// In-memory database removed on drop. Used by tests and dry runs.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    /// Wrap an open database. Lock records found here are cleared: the
    /// database is only opened when no other process and no live session of
    /// this process has it, so every record belongs to a session that ended.
    pub fn from_db(db: Db) -> Result<Self, StorageError> {
        let entries = db.open_tree(TREE_ENTRIES)?;
        let locks = db.open_tree(TREE_LOCKS)?;
        let meta = db.open_tree(TREE_META)?;
        locks.clear()?;
        Ok(Self {
            inner: Arc::new(CacheInner {
                db,
                entries,
                locks,
                meta,
            }),
        })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.inner.entries.get(key.as_bytes())? else {
            return Ok(None);
        };
        let envelope: Envelope = serde_json::from_slice(&raw)?;
        if !envelope.is_live(now_millis()) {
            // Only remove the exact stale value; a concurrent writer may have replaced it.
            let _ = self
                .inner.entries
                .compare_and_swap(key.as_bytes(), Some(raw), None as Option<&[u8]>)?;
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(envelope.value)?))
    }

    pub fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let encoded = encode(value, ttl)?;
        self.inner.entries.insert(key.as_bytes(), encoded)?;
        Ok(())
    }

    /// Remove `key`. Returns whether a value was present.
    pub fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.inner.entries.remove(key.as_bytes())?.is_some())
    }

    /// Atomic read-modify-write. `f` sees the current live value (if any) and
    /// returns the value to store together with a result for the caller. `f`
    /// may run more than once under contention.
    pub fn update<T, R, F>(&self, key: &str, ttl: Option<Duration>, mut f: F) -> Result<R, StorageError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(Option<T>) -> (T, R),
    {
        loop {
            let current: Option<IVec> = self.inner.entries.get(key.as_bytes())?;
            let decoded = match current.as_ref() {
                Some(raw) => decode_live::<T>(raw)?,
                None => None,
            };
            let (next, result) = f(decoded);
            let encoded = encode(&next, ttl)?;
            match self
                .inner.entries
                .compare_and_swap(key.as_bytes(), current, Some(encoded))?
            {
                Ok(()) => return Ok(result),
                Err(_) => continue,
            }
        }
    }

    /// Atomically add one to the counter under `key` and return the new value.
    /// The expiry is only set when the counter is created.
    pub fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<u64, StorageError> {
        loop {
            let current: Option<IVec> = self.inner.entries.get(key.as_bytes())?;
            let existing = match current.as_ref() {
                Some(raw) => {
                    let envelope: Envelope = serde_json::from_slice(raw)?;
                    if envelope.is_live(now_millis()) {
                        Some(envelope)
                    } else {
                        None
                    }
                }
                None => None,
            };
            let (count, expires_at_ms) = match existing {
                Some(envelope) => (
                    serde_json::from_value::<u64>(envelope.value)?.saturating_add(1),
                    envelope.expires_at_ms,
                ),
                None => (1, ttl.map(|t| now_millis() + t.as_millis() as u64)),
            };
            let encoded = serde_json::to_vec(&Envelope {
                expires_at_ms,
                value: serde_json::Value::from(count),
            })?;
            match self
                .inner.entries
                .compare_and_swap(key.as_bytes(), current, Some(encoded))?
            {
                Ok(()) => return Ok(count),
                Err(_) => continue,
            }
        }
    }

    /// Claim the lock record `name` for `token`. Fails if any owner holds it.
    pub fn try_claim_lock(&self, name: &str, token: &str) -> Result<bool, StorageError> {
        let outcome = self.inner.locks.compare_and_swap(
            name.as_bytes(),
            None as Option<&[u8]>,
            Some(token.as_bytes()),
        )?;
        Ok(outcome.is_ok())
    }

    /// Release the lock record `name` if it is still owned by `token`.
    pub fn release_lock(&self, name: &str, token: &str) -> Result<bool, StorageError> {
        let outcome = self.inner.locks.compare_and_swap(
            name.as_bytes(),
            Some(token.as_bytes()),
            None as Option<&[u8]>,
        )?;
        Ok(outcome.is_ok())
    }

    pub fn lock_owner(&self, name: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .inner.locks
            .get(name.as_bytes())?
            .map(|raw| String::from_utf8_lossy(&raw).into_owned()))
    }

    /// Per-installation secret, generated on first use and persisted.
    pub fn installation_secret(&self) -> Result<[u8; 32], StorageError> {
        if let Some(raw) = self.inner.meta.get(KEY_INSTALLATION_SECRET)? {
            return secret_from_bytes(&raw);
        }
        let fresh: [u8; 32] = rand::random();
        // Another handle may have raced us; whichever value landed first wins.
        let _ = self.inner.meta.compare_and_swap(
            KEY_INSTALLATION_SECRET,
            None as Option<&[u8]>,
            Some(&fresh[..]),
        )?;
        match self.inner.meta.get(KEY_INSTALLATION_SECRET)? {
            Some(raw) => secret_from_bytes(&raw),
            None => Ok(fresh),
        }
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.inner.db.flush()?;
        Ok(())
    }

    pub fn db(&self) -> &Db {
        &self.inner.db
    }
}

fn open_error(path: &Path, err: sled::Error) -> StorageError {
    match err {
        sled::Error::Io(ref io)
            if io.kind() == std::io::ErrorKind::WouldBlock
                || io.to_string().contains("could not acquire lock") =>
        {
            StorageError::Busy(path.to_path_buf())
        }
        other => other.into(),
    }
}

enum Origin {
    Path(PathBuf),
    Fixed(SharedCache),
}

/// Opens cache sessions on demand.
///
/// A session is a [`SharedCache`] clone. While any session of this process is
/// alive, new sessions reuse it; once all are dropped the database is closed
/// and other processes may open it.
pub struct CacheStore {
    origin: Origin,
    live: Mutex<Weak<CacheInner>>,
    poll_interval: Duration,
}

impl CacheStore {
    pub fn at(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            origin: Origin::Path(path.into()),
            live: Mutex::new(Weak::new()),
            poll_interval,
        }
    }

    /// Store that always hands out `cache`, which stays open for its lifetime.
    pub fn fixed(cache: SharedCache) -> Self {
        Self {
            origin: Origin::Fixed(cache),
            live: Mutex::new(Weak::new()),
            poll_interval: Duration::from_millis(10),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.origin {
            Origin::Path(path) => Some(path),
            Origin::Fixed(_) => None,
        }
    }

    /// Single attempt. Reuses a live session or opens the database.
    pub fn try_session(&self) -> Result<SharedCache, StorageError> {
        let path = match &self.origin {
            Origin::Fixed(cache) => return Ok(cache.clone()),
            Origin::Path(path) => path,
        };
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(inner) = live.upgrade() {
            return Ok(SharedCache { inner });
        }
        let cache = SharedCache::open(path)?;
        *live = Arc::downgrade(&cache.inner);
        debug!(path = %path.display(), "Cache session opened");
        Ok(cache)
    }

    /// Wait up to `timeout` for the database to become free.
    pub async fn session(&self, timeout: Duration) -> Result<SharedCache, StorageError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_session() {
                Err(e) if e.is_busy() && Instant::now() < deadline => {
                    tokio::time::sleep(self.wait_step(deadline)).await;
                }
                result => return result,
            }
        }
    }

    /// Blocking variant of [`CacheStore::session`] for synchronous callers.
    pub fn session_blocking(&self, timeout: Duration) -> Result<SharedCache, StorageError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_session() {
                Err(e) if e.is_busy() && Instant::now() < deadline => {
                    std::thread::sleep(self.wait_step(deadline));
                }
                result => return result,
            }
        }
    }

    fn wait_step(&self, deadline: Instant) -> Duration {
        self.poll_interval
            .min(deadline.saturating_duration_since(Instant::now()))
    }
}

fn encode<T: Serialize>(value: &T, ttl: Option<Duration>) -> Result<Vec<u8>, StorageError> {
    let envelope = Envelope {
        expires_at_ms: ttl.map(|t| now_millis() + t.as_millis() as u64),
        value: serde_json::to_value(value)?,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

fn decode_live<T: DeserializeOwned>(raw: &[u8]) -> Result<Option<T>, StorageError> {
    let envelope: Envelope = serde_json::from_slice(raw)?;
    if !envelope.is_live(now_millis()) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(envelope.value)?))
}

fn secret_from_bytes(raw: &[u8]) -> Result<[u8; 32], StorageError> {
    raw.try_into().map_err(|_| {
        StorageError::InvalidData(format!(
            "installation secret has {} bytes, expected 32",
            raw.len()
        ))
    })
}
