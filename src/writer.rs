//! Atomic file writer with backup and read-back verification.
//!
//! Readers of the target path only ever see the previous content or the new
//! content in full: bytes go to a locked temporary sibling, are read back and
//! compared, and only then renamed over the target.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tracing::{debug, error, warn};

use crate::error::{PipelineError, StorageError};

/// Reads back a freshly written temporary file for verification.
pub type ReadBack = Arc<dyn Fn(&Path) -> io::Result<Vec<u8>> + Send + Sync>;

#[derive(Clone)]
pub struct AtomicWriter {
    read_back: ReadBack,
}

impl Default for AtomicWriter {
    fn default() -> Self {
        Self {
            read_back: Arc::new(|path: &Path| fs::read(path)),
        }
    }
}

impl std::fmt::Debug for AtomicWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicWriter").finish_non_exhaustive()
    }
}

pub fn backup_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_string_lossy();
    Some(path.with_file_name(format!("{}.backup", name)))
}

impl AtomicWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer whose verification step reads through `read_back`.
    pub fn with_read_back(read_back: ReadBack) -> Self {
        Self { read_back }
    }

    /// Write `content` to `path`. Failures are logged; the return value says
    /// whether the new content is in place.
    pub fn write(&self, path: &Path, content: &[u8]) -> bool {
        match self.try_write(path, content) {
            Ok(()) => true,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Atomic write failed");
                false
            }
        }
    }

    pub fn try_write(&self, path: &Path, content: &[u8]) -> Result<(), PipelineError> {
        let name = path
            .file_name()
            .ok_or_else(|| StorageError::InvalidPath(path.display().to_string()))?
            .to_string_lossy()
            .into_owned();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(StorageError::from)?;

        let backup = dir.join(format!("{}.backup", name));
        let had_original = path.exists();
        if had_original {
            fs::copy(path, &backup).map_err(StorageError::from)?;
        }

        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{}.tmp.", name))
            .tempfile_in(&dir)
            .map_err(StorageError::from)?;
        write_locked(temp.as_file_mut(), content).map_err(StorageError::from)?;

        let verified = match (self.read_back)(temp.path()) {
            Ok(bytes) => bytes == content,
            Err(e) => {
                warn!(path = %temp.path().display(), error = %e, "Read-back of temporary file failed");
                false
            }
        };
        if !verified {
            // Dropping the handle deletes the temporary file.
            drop(temp);
            if had_original {
                restore_from(&backup, path);
            }
            return Err(PipelineError::WriteVerificationFailed(path.to_path_buf()));
        }

        if let Err(e) = temp.persist(path) {
            error!(path = %path.display(), error = %e.error, "Rename onto target failed");
            if had_original {
                restore_from(&backup, path);
            }
            return Err(PipelineError::Storage(StorageError::IoError(e.error)));
        }

        if had_original {
            if let Err(e) = fs::remove_file(&backup) {
                warn!(path = %backup.display(), error = %e, "Failed to remove backup");
            }
        }
        debug!(path = %path.display(), bytes = content.len(), "Atomic write complete");
        Ok(())
    }
}

fn write_locked(file: &mut fs::File, content: &[u8]) -> io::Result<()> {
    FileExt::lock_exclusive(file)?;
    let result = file
        .write_all(content)
        .and_then(|()| file.flush())
        .and_then(|()| file.sync_all());
    let unlocked = FileExt::unlock(file);
    result.and(unlocked)
}

/// Put the backup back if the target differs from it, then drop the backup.
/// The backup stays on disk when the target could not be restored.
fn restore_from(backup: &Path, target: &Path) {
    let Ok(saved) = fs::read(backup) else {
        error!(path = %backup.display(), "Backup unreadable, target left as is");
        return;
    };
    if fs::read(target).ok().as_deref() != Some(saved.as_slice()) {
        if let Err(e) = fs::copy(backup, target) {
            error!(path = %target.display(), error = %e, "Restore from backup failed");
            return;
        }
        warn!(path = %target.display(), "Target restored from backup");
    }
    if let Err(e) = fs::remove_file(backup) {
        warn!(path = %backup.display(), error = %e, "Failed to remove backup");
    }
}
