//! On-disk layout helpers for a table root.
//!
//! This module centralizes all *relative* path conventions under a table root:
//! - transaction log directory (`_delta_log/`)
//! - version files, consistency digests and checkpoints
//! - the `_last_checkpoint` hint
//!
//! The functions here return relative [`std::path::PathBuf`] values. Callers are
//! expected to join these with a table root (for example, a
//! [`crate::storage::TableLocation`]) before doing IO.

use std::path::{Path, PathBuf};

/// Name of the subdirectory containing the transaction log.
pub const LOG_DIR_NAME: &str = "_delta_log";

/// Name of the file that points at the most recent checkpoint.
pub const LAST_CHECKPOINT_FILE_NAME: &str = "_last_checkpoint";

/// Number of digits used in zero-padded version file names.
pub const VERSION_FILENAME_DIGITS: usize = 20;

const VERSION_SUFFIX: &str = ".json";
const DIGEST_SUFFIX: &str = ".crc";
const CHECKPOINT_SUFFIX: &str = ".checkpoint.parquet";

/// Relative path: `_delta_log/`
pub fn log_rel_dir() -> PathBuf {
    PathBuf::from(LOG_DIR_NAME)
}

fn padded(version: u64) -> String {
    format!("{:0width$}", version, width = VERSION_FILENAME_DIGITS)
}

/// Relative path: `_delta_log/<zero-padded>.json`
pub fn version_rel_path(version: u64) -> PathBuf {
    log_rel_dir().join(format!("{}{VERSION_SUFFIX}", padded(version)))
}

/// Relative path: `_delta_log/<zero-padded>.crc`
pub fn digest_rel_path(version: u64) -> PathBuf {
    log_rel_dir().join(format!("{}{DIGEST_SUFFIX}", padded(version)))
}

/// Relative path: `_delta_log/<zero-padded>.checkpoint.parquet`
pub fn checkpoint_rel_path(version: u64) -> PathBuf {
    log_rel_dir().join(format!("{}{CHECKPOINT_SUFFIX}", padded(version)))
}

/// Relative path: `_delta_log/_last_checkpoint`
pub fn last_checkpoint_rel_path() -> PathBuf {
    log_rel_dir().join(LAST_CHECKPOINT_FILE_NAME)
}

/// A file inside `_delta_log/` recognized by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFileKind {
    /// `<version>.json`
    Version(u64),
    /// `<version>.crc`
    Digest(u64),
    /// `<version>.checkpoint.parquet`
    Checkpoint(u64),
}

fn parse_padded(stem: &str) -> Option<u64> {
    if stem.len() != VERSION_FILENAME_DIGITS || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Classify a file name found in the log directory.
///
/// Names that do not follow the layout (temp files, the checkpoint hint,
/// foreign files) yield `None`.
pub fn parse_log_file_name(name: &str) -> Option<LogFileKind> {
    if let Some(stem) = name.strip_suffix(CHECKPOINT_SUFFIX) {
        return parse_padded(stem).map(LogFileKind::Checkpoint);
    }
    if let Some(stem) = name.strip_suffix(VERSION_SUFFIX) {
        return parse_padded(stem).map(LogFileKind::Version);
    }
    if let Some(stem) = name.strip_suffix(DIGEST_SUFFIX) {
        return parse_padded(stem).map(LogFileKind::Digest);
    }
    None
}

/// Whether a table-relative path is hidden from data-file listings.
///
/// Any component starting with `_` or `.` hides the path; this covers the
/// log directory and writer temp files.
pub fn is_hidden_rel_path(rel: &Path) -> bool {
    rel.components().any(|c| {
        let s = c.as_os_str().to_string_lossy();
        s.starts_with('_') || s.starts_with('.')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_paths_are_zero_padded_to_twenty_digits() {
        assert_eq!(
            version_rel_path(0),
            PathBuf::from("_delta_log/00000000000000000000.json")
        );
        assert_eq!(
            checkpoint_rel_path(10),
            PathBuf::from("_delta_log/00000000000000000010.checkpoint.parquet")
        );
        assert_eq!(
            digest_rel_path(3),
            PathBuf::from("_delta_log/00000000000000000003.crc")
        );
    }

    #[test]
    fn parse_log_file_name_classifies_known_files() {
        assert_eq!(
            parse_log_file_name("00000000000000000007.json"),
            Some(LogFileKind::Version(7))
        );
        assert_eq!(
            parse_log_file_name("00000000000000000007.crc"),
            Some(LogFileKind::Digest(7))
        );
        assert_eq!(
            parse_log_file_name("00000000000000000010.checkpoint.parquet"),
            Some(LogFileKind::Checkpoint(10))
        );
        assert_eq!(parse_log_file_name("_last_checkpoint"), None);
        assert_eq!(parse_log_file_name("7.json"), None);
        assert_eq!(parse_log_file_name("0000000000000000000x.json"), None);
    }

    #[test]
    fn hidden_paths_cover_log_and_dot_files() {
        assert!(is_hidden_rel_path(Path::new("_delta_log/00000000000000000000.json")));
        assert!(is_hidden_rel_path(Path::new(".part-1.parquet.tmp")));
        assert!(!is_hidden_rel_path(Path::new("part-00000-abc.parquet")));
        assert!(!is_hidden_rel_path(Path::new("country=UK/part-00000-abc.parquet")));
    }
}
