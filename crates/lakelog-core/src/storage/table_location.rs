//! User-facing table root locations.
use std::path::{Path, PathBuf};

use crate::storage::StorageLocation;

/// Table root location with table-scoped semantics.
///
/// This wraps `StorageLocation` and is used when callers need to treat the
/// location as a table root (log layout, data file paths, vacuum listings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLocation(StorageLocation);

impl From<TableLocation> for StorageLocation {
    fn from(t: TableLocation) -> Self {
        t.0
    }
}

impl AsRef<StorageLocation> for TableLocation {
    fn as_ref(&self) -> &StorageLocation {
        &self.0
    }
}

impl std::fmt::Display for TableLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            StorageLocation::Local(root) => write!(f, "file://{}", root.display()),
        }
    }
}

impl TableLocation {
    /// Creates a new `TableLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        TableLocation(StorageLocation::Local(root.into()))
    }

    /// Return the underlying StorageLocation
    pub fn storage(&self) -> &StorageLocation {
        &self.0
    }

    /// Local root directory of the table.
    pub fn root(&self) -> &Path {
        match &self.0 {
            StorageLocation::Local(root) => root,
        }
    }
}
