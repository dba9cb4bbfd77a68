//! Storage backend and path utilities.
//!
//! This module centralizes all filesystem-related logic for `lakelog-core`.
//! It maps a table root to the log directory, version files, checkpoints and
//! data files, and provides the small set of primitives the engine relies on:
//!
//! - [`write_new`]: atomic create-if-absent. This is the only concurrency
//!   control primitive of the table format: exactly one writer succeeds in
//!   creating `<version>.json`.
//! - [`write_atomic`]: write-then-rename replacement for derived files
//!   (checkpoints, digests, the `_last_checkpoint` hint).
//! - Reads, listings, metadata lookups and idempotent deletes.
//!
//! ## Consistency precondition
//!
//! The backing store must provide atomic create-if-absent and
//! read-after-write consistency for listings. Local filesystems provide both
//! through hard links, which refuse to replace an existing target;
//! eventually consistent object stores are not supported.

pub mod error;
pub mod layout;
pub mod retry;
pub mod table_location;

pub use error::{BackendError, StorageError};
pub use retry::RetryPolicy;
pub use table_location::TableLocation;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use snafu::prelude::*;
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};

use crate::storage::error::OtherIoSnafu;

/// General result type used by storage operations.
///
/// This aliases `Result<T, StorageError>` so functions in this module can
/// return a concise result type while still communicating storage-specific
/// error information via `StorageError`.
pub type StorageResult<T> = Result<T, StorageError>;

/// Backend-level location. Only the local filesystem is supported.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageLocation {
    /// A location on the local filesystem rooted at the given path.
    Local(PathBuf),
    // Future:
    // S3 { bucket: String, prefix: String },
}

/// Join a storage location with a relative path into an absolute local path.
pub(crate) fn join_local(location: &StorageLocation, rel: &Path) -> PathBuf {
    match location {
        StorageLocation::Local(root) => root.join(rel),
    }
}

pub(crate) async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: parent.display().to_string(),
            })?;
    }
    Ok(())
}

/// Guard that removes a temporary file on drop unless disarmed.
/// Used to ensure cleanup on error paths during atomic writes.
pub(crate) struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Disarm the guard so the file is NOT removed on drop.
    /// Call this after a successful rename.
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort cleanup; we're likely already handling another error.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Hidden, per-writer temp path next to `abs` so concurrent writers of the
/// same target never share a temp file and listings never see it.
fn temp_path_for(abs: &Path) -> PathBuf {
    let name = abs
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    abs.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

/// Write `contents` to `rel_path` inside `location` using an atomic write.
///
/// This performs a write-then-rename sequence on the local filesystem:
/// it writes the payload to a temporary file next to the target path,
/// syncs the file, and then renames it into place to provide an atomic
/// replacement.
///
/// # Errors
///
/// Returns `StorageError::OtherIo` when filesystem I/O fails.
pub async fn write_atomic(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);

            create_parent_dir(&abs).await?;

            let tmp_path = temp_path_for(&abs);
            let mut guard = TempFileGuard::new(tmp_path.clone());

            {
                let mut file = fs::File::create(&tmp_path)
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_path.display().to_string(),
                    })?;

                file.write_all(contents)
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_path.display().to_string(),
                    })?;

                file.sync_all()
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_path.display().to_string(),
                    })?;
            }

            fs::rename(&tmp_path, &abs)
                .await
                .map_err(BackendError::Local)
                .context(OtherIoSnafu {
                    path: abs.display().to_string(),
                })?;

            guard.disarm();

            Ok(())
        }
    }
}

/// Create a *new* file at `rel_path` and write `contents`, failing with
/// `StorageError::AlreadyExists` if the file already exists.
///
/// The payload is written and synced to a hidden temp file which is then
/// hard-linked to the target. Linking fails if the target exists, so the
/// create-if-absent check and the publication of the full contents happen
/// in one step; readers never observe a partially written file.
///
/// This is used for version files (per-version uniqueness) and for data
/// files, which are write-once.
pub async fn write_new(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            create_parent_dir(&abs).await?;

            let path_str = abs.display().to_string();
            let tmp_path = temp_path_for(&abs);
            let tmp_str = tmp_path.display().to_string();
            let _guard = TempFileGuard::new(tmp_path.clone());

            {
                let mut file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&tmp_path)
                    .await
                    .map_err(|e| BackendError::classify(e, tmp_str.clone()))?;

                file.write_all(contents)
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_str.clone(),
                    })?;

                file.sync_all()
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu { path: tmp_str })?;
            }

            // Atomic "create only if not exists" on the target path. The
            // guard removes the temp name either way.
            fs::hard_link(&tmp_path, &abs)
                .await
                .map_err(|e| BackendError::classify(e, path_str))?;

            Ok(())
        }
    }
}

/// Read the file at `rel_path` within the given `location` and return its
/// contents as a `String`.
///
/// If the file cannot be found a `StorageError::NotFound` is returned, while
/// other filesystem problems produce `StorageError::OtherIo`.
pub async fn read_to_string(location: &StorageLocation, rel_path: &Path) -> StorageResult<String> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            fs::read_to_string(&abs)
                .await
                .map_err(|e| BackendError::classify(e, abs.display().to_string()))
        }
    }
}

/// Read the full contents of a file at `rel_path` within `location` and return
/// them as a Vec<u8>.
pub async fn read_all_bytes(location: &StorageLocation, rel_path: &Path) -> StorageResult<Vec<u8>> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            fs::read(&abs)
                .await
                .map_err(|e| BackendError::classify(e, abs.display().to_string()))
        }
    }
}

/// Size and modification time of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Path relative to the listed location.
    pub rel_path: PathBuf,
    /// Length in bytes.
    pub size_bytes: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
}

fn object_meta(rel_path: PathBuf, meta: &std::fs::Metadata) -> ObjectMeta {
    let last_modified = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    ObjectMeta {
        rel_path,
        size_bytes: meta.len(),
        last_modified,
    }
}

/// Probe a single object. Directories are reported as `NotFound`.
pub async fn head(location: &StorageLocation, rel_path: &Path) -> StorageResult<ObjectMeta> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            let path_str = abs.display().to_string();
            let meta = fs::metadata(&abs)
                .await
                .map_err(|e| BackendError::classify(e, path_str.clone()))?;
            if !meta.is_file() {
                return Err(BackendError::classify(
                    std::io::Error::new(std::io::ErrorKind::NotFound, "not a regular file"),
                    path_str,
                ));
            }
            Ok(object_meta(rel_path.to_path_buf(), &meta))
        }
    }
}

/// List the regular files directly under `rel_dir`.
///
/// A missing directory lists as empty. Returned paths are file names only.
pub async fn list_dir(
    location: &StorageLocation,
    rel_dir: &Path,
) -> StorageResult<Vec<ObjectMeta>> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_dir);
            let path_str = abs.display().to_string();
            let mut entries = match fs::read_dir(&abs).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => {
                    return Err(BackendError::Local(e)).context(OtherIoSnafu { path: path_str });
                }
            };

            let mut out = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(BackendError::Local)
                .context(OtherIoSnafu {
                    path: path_str.clone(),
                })?
            {
                let meta = match entry.metadata().await {
                    Ok(m) => m,
                    // Raced with a concurrent delete.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => {
                        return Err(BackendError::Local(e)).context(OtherIoSnafu {
                            path: entry.path().display().to_string(),
                        });
                    }
                };
                if meta.is_file() {
                    out.push(object_meta(PathBuf::from(entry.file_name()), &meta));
                }
            }
            Ok(out)
        }
    }
}

/// Recursively list regular files under the location root, skipping any
/// directory for which `skip_dir` returns true.
///
/// Returned paths are relative to the location root.
pub async fn list_files_recursive(
    location: &StorageLocation,
    skip_dir: impl Fn(&Path) -> bool,
) -> StorageResult<Vec<ObjectMeta>> {
    let mut out = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(rel_dir) = pending.pop() {
        let abs = join_local(location, &rel_dir);
        let path_str = abs.display().to_string();
        let mut entries = match fs::read_dir(&abs).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(BackendError::Local(e)).context(OtherIoSnafu { path: path_str }),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: path_str.clone(),
            })?
        {
            let rel = rel_dir.join(entry.file_name());
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(BackendError::Local(e)).context(OtherIoSnafu {
                        path: entry.path().display().to_string(),
                    });
                }
            };
            if meta.is_dir() {
                if !skip_dir(&rel) {
                    pending.push(rel);
                }
            } else if meta.is_file() {
                out.push(object_meta(rel, &meta));
            }
        }
    }

    Ok(out)
}

/// Delete the object at `rel_path`.
///
/// Deleting a missing object succeeds, so repeated deletes are idempotent.
/// Returns whether this call removed the object.
pub async fn delete(location: &StorageLocation, rel_path: &Path) -> StorageResult<bool> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            match fs::remove_file(&abs).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(BackendError::Local(e)).context(OtherIoSnafu {
                    path: abs.display().to_string(),
                }),
            }
        }
    }
}
