//! The append-only 32-byte hash log backing a file MMR.
//!
//! The log is held in memory between commits; `commit` writes the whole
//! log to a new generation file, leaving the previous generation intact
//! so a crash mid-flush never corrupts the current state.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use mweb_consensus::Hash256;

pub const HASH_SIZE: usize = 32;

#[derive(Debug, Default)]
pub struct HashFile {
    bytes: Vec<u8>,
}

impl HashFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err),
        };
        Ok(Self { bytes })
    }

    pub fn num_hashes(&self) -> u64 {
        (self.bytes.len() / HASH_SIZE) as u64
    }

    pub fn append(&mut self, hash: &Hash256) {
        self.bytes.extend_from_slice(hash);
    }

    /// Truncate to the first `num_hashes` entries.
    pub fn rewind(&mut self, num_hashes: u64) {
        let len = (num_hashes as usize) * HASH_SIZE;
        if len < self.bytes.len() {
            self.bytes.truncate(len);
        }
    }

    pub fn hash_at(&self, physical_pos: u64) -> Option<Hash256> {
        let start = (physical_pos as usize).checked_mul(HASH_SIZE)?;
        let end = start + HASH_SIZE;
        if end > self.bytes.len() {
            return None;
        }
        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&self.bytes[start..end]);
        Some(hash)
    }

    pub fn commit(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &self.bytes)
    }
}

/// Path of one MMR hash-log generation: `{prefix}{index:06}.dat`.
pub fn mmr_file_path(dir: &Path, prefix: char, file_index: u32) -> PathBuf {
    dir.join(format!("{prefix}{file_index:06}.dat"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_rewind_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = mmr_file_path(dir.path(), 'K', 1);

        let mut file = HashFile::open(&path).unwrap();
        assert_eq!(file.num_hashes(), 0);

        file.append(&[1u8; 32]);
        file.append(&[2u8; 32]);
        file.append(&[3u8; 32]);
        file.rewind(2);
        assert_eq!(file.num_hashes(), 2);
        assert_eq!(file.hash_at(1), Some([2u8; 32]));
        assert_eq!(file.hash_at(2), None);

        file.commit(&path).unwrap();
        let reloaded = HashFile::open(&path).unwrap();
        assert_eq!(reloaded.num_hashes(), 2);
        assert_eq!(reloaded.hash_at(0), Some([1u8; 32]));
    }

    #[test]
    fn generation_naming() {
        let path = mmr_file_path(Path::new("/data"), 'O', 42);
        assert!(path.ends_with("O000042.dat"));
    }
}
