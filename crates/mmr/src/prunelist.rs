//! Bitset of node positions physically removed from the hash log.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::bitset::BitSet;
use crate::index::Index;
use crate::MmrError;

/// Tracks which positions have been compacted away, and how far
/// subsequent positions shift when translating logical positions into
/// physical hash-log offsets.
#[derive(Clone, Debug, Default)]
pub struct PruneList {
    bitset: BitSet,
}

impl PruneList {
    pub fn open(dir: &Path, file_index: u32) -> Result<Self, MmrError> {
        let path = Self::path(dir, file_index);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(MmrError::Io(err)),
        };
        Ok(Self {
            bitset: BitSet::from_bytes(&bytes),
        })
    }

    pub fn from_bitset(bitset: BitSet) -> Self {
        Self { bitset }
    }

    pub fn flush(&self, dir: &Path, file_index: u32) -> Result<(), MmrError> {
        fs::create_dir_all(dir)?;
        fs::write(Self::path(dir, file_index), self.bitset.as_bytes())?;
        Ok(())
    }

    pub fn path(dir: &Path, file_index: u32) -> PathBuf {
        dir.join(format!("prun{file_index:06}.dat"))
    }

    pub fn is_pruned(&self, idx: &Index) -> bool {
        self.bitset.test(idx.position())
    }

    /// Number of pruned positions strictly before `position`.
    pub fn shift_at(&self, position: u64) -> u64 {
        self.bitset.rank(position)
    }

    pub fn shift(&self, idx: &Index) -> u64 {
        self.shift_at(idx.position())
    }

    /// Total number of pruned positions.
    pub fn total_shift(&self) -> u64 {
        self.bitset.count()
    }

    pub fn bitset(&self) -> &BitSet {
        &self.bitset
    }
}
