//! Per-version consistency digest (`<version>.crc`).
//!
//! The digest summarizes the snapshot at a version: record counts and byte
//! totals binned by file size. It is cheap to compute after a commit and is
//! used to validate checkpoints before replay trusts them.
use serde::{Deserialize, Serialize};

use crate::transaction_log::AddFile;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Lower bounds of the file size bins. Bin `i` covers
/// `[BIN_BOUNDARIES[i], BIN_BOUNDARIES[i + 1])`; the last bin is unbounded.
pub const BIN_BOUNDARIES: [u64; 14] = [
    0,
    8 * KIB,
    64 * KIB,
    512 * KIB,
    MIB,
    4 * MIB,
    8 * MIB,
    16 * MIB,
    32 * MIB,
    64 * MIB,
    128 * MIB,
    256 * MIB,
    512 * MIB,
    GIB,
];

/// File counts and byte totals binned by file size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileSizeHistogram {
    /// Lower bound of each bin.
    pub sorted_bin_boundaries: Vec<u64>,
    /// Number of files per bin.
    pub file_counts: Vec<u64>,
    /// Total bytes per bin.
    pub total_bytes: Vec<u64>,
}

impl Default for FileSizeHistogram {
    fn default() -> Self {
        Self {
            sorted_bin_boundaries: BIN_BOUNDARIES.to_vec(),
            file_counts: vec![0; BIN_BOUNDARIES.len()],
            total_bytes: vec![0; BIN_BOUNDARIES.len()],
        }
    }
}

impl FileSizeHistogram {
    /// Record one file of `size` bytes.
    pub fn insert(&mut self, size: u64) {
        let bin = self
            .sorted_bin_boundaries
            .partition_point(|&lower| lower <= size)
            .saturating_sub(1);
        if let (Some(count), Some(bytes)) =
            (self.file_counts.get_mut(bin), self.total_bytes.get_mut(bin))
        {
            *count += 1;
            *bytes += size;
        }
    }
}

/// Summary of the snapshot at one version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionDigest {
    /// Sum of live file sizes.
    pub table_size_bytes: u64,
    /// Number of live files.
    pub num_files: u64,
    /// Number of active metadata actions (1 for a valid snapshot).
    pub num_metadata: u64,
    /// Number of active protocol actions (1 for a valid snapshot).
    pub num_protocol: u64,
    /// Live file sizes binned by range.
    pub file_size_histogram: FileSizeHistogram,
}

impl VersionDigest {
    /// Compute the digest of a live file set.
    pub fn compute<'a>(
        files: impl IntoIterator<Item = &'a AddFile>,
        num_metadata: u64,
        num_protocol: u64,
    ) -> Self {
        let mut histogram = FileSizeHistogram::default();
        let mut table_size_bytes = 0;
        let mut num_files = 0;
        for add in files {
            histogram.insert(add.size_bytes);
            table_size_bytes += add.size_bytes;
            num_files += 1;
        }
        Self {
            table_size_bytes,
            num_files,
            num_metadata,
            num_protocol,
            file_size_histogram: histogram,
        }
    }

    /// Describe the first field that differs from `expected`, if any.
    pub fn mismatch(&self, expected: &VersionDigest) -> Option<String> {
        if self.num_files != expected.num_files {
            return Some(format!(
                "numFiles {} != expected {}",
                self.num_files, expected.num_files
            ));
        }
        if self.table_size_bytes != expected.table_size_bytes {
            return Some(format!(
                "tableSizeBytes {} != expected {}",
                self.table_size_bytes, expected.table_size_bytes
            ));
        }
        if self.num_metadata != expected.num_metadata || self.num_protocol != expected.num_protocol
        {
            return Some(format!(
                "metadata/protocol counts ({}, {}) != expected ({}, {})",
                self.num_metadata, self.num_protocol, expected.num_metadata, expected.num_protocol
            ));
        }
        if self.file_size_histogram != expected.file_size_histogram {
            return Some("file size histogram differs".to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::add_file;

    #[test]
    fn histogram_bins_are_half_open() {
        let mut h = FileSizeHistogram::default();
        h.insert(0);
        h.insert(8 * KIB - 1);
        h.insert(8 * KIB);
        h.insert(2 * GIB);

        assert_eq!(h.file_counts[0], 2);
        assert_eq!(h.file_counts[1], 1);
        assert_eq!(h.file_counts[13], 1);
        assert_eq!(h.total_bytes[13], 2 * GIB);
    }

    #[test]
    fn compute_and_mismatch() {
        let a = add_file("a.parquet", 100);
        let b = add_file("b.parquet", 10 * MIB);
        let digest = VersionDigest::compute([&a, &b], 1, 1);
        assert_eq!(digest.num_files, 2);
        assert_eq!(digest.table_size_bytes, 100 + 10 * MIB);
        assert_eq!(digest.mismatch(&digest.clone()), None);

        let missing_one = VersionDigest::compute([&a], 1, 1);
        let msg = missing_one.mismatch(&digest).expect("digests differ");
        assert!(msg.contains("numFiles"), "{msg}");
    }

    #[test]
    fn serializes_camel_case() {
        let digest = VersionDigest::compute(std::iter::empty(), 1, 1);
        let json = serde_json::to_string(&digest).expect("ser");
        assert!(json.contains("\"tableSizeBytes\":0"));
        assert!(json.contains("\"sortedBinBoundaries\":[0,8192,"));
    }
}
