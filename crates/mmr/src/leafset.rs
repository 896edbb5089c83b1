//! The leaf-liveness bitset: one bit per leaf, set while unspent.
//!
//! On disk: an 8-byte big-endian next-leaf-index prefix followed by
//! MSB-first packed bits, one generation file per flush. In memory the
//! base file is overlaid with a sparse modified-byte map until flushed.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use mweb_consensus::Hash256;
use mweb_primitives::hash::hashed_bytes;

use crate::index::LeafIndex;
use crate::MmrError;

/// Byte offset of the packed bits within the leafset file.
const BITS_OFFSET: u64 = 8;

pub type SharedLeafSet = Arc<RwLock<dyn LeafSetOps>>;

pub trait LeafSetOps: Send + Sync {
    /// Mark the leaf unspent. Extends the tracked range if needed.
    fn add(&mut self, idx: &LeafIndex);

    /// Mark the leaf spent.
    fn remove(&mut self, idx: &LeafIndex);

    fn contains(&self, idx: &LeafIndex) -> bool;

    fn next_leaf_index(&self) -> LeafIndex;

    /// Byte of packed bits at logical byte index `byte_idx`.
    fn get_byte(&self, byte_idx: u64) -> u8;

    /// Shrink to `num_leaves`, re-setting the bits in `leaves_to_restore`
    /// (coins that must become unspent again when a block is undone).
    fn rewind(&mut self, num_leaves: u64, leaves_to_restore: &[LeafIndex]);

    /// Hash of the packed bitset covering all tracked leaves.
    fn root(&self) -> Hash256;

    /// Snapshot of the liveness bits, sized to the tracked leaf count.
    fn to_bitset(&self) -> crate::bitset::BitSet {
        let next_leaf = self.next_leaf_index().get();
        let num_bytes = (next_leaf + 7) / 8;
        let bytes: Vec<u8> = (0..num_bytes).map(|idx| self.get_byte(idx)).collect();
        crate::bitset::BitSet::from_bytes_with_len(&bytes, next_leaf)
    }

    /// Write the current state as generation `file_index`.
    fn flush(&mut self, file_index: u32) -> Result<(), MmrError>;

    /// Fold a cache's modified bytes and next-leaf index into this
    /// leafset, then flush. Called when a cache layered on this leafset
    /// commits.
    fn apply_updates(
        &mut self,
        file_index: u32,
        next_leaf: LeafIndex,
        modified_bytes: &BTreeMap<u64, u8>,
    ) -> Result<(), MmrError>;
}

fn bit_mask(idx: &LeafIndex) -> (u64, u8) {
    (idx.get() / 8, 0x80 >> (idx.get() % 8))
}

fn packed_bytes(ops: &impl LeafSetOps) -> Vec<u8> {
    let num_bytes = (ops.next_leaf_index().get() + 7) / 8;
    (0..num_bytes).map(|idx| ops.get_byte(idx)).collect()
}

/// File-backed leafset.
pub struct LeafSet {
    dir: PathBuf,
    base_bytes: Vec<u8>,
    modified_bytes: BTreeMap<u64, u8>,
    next_leaf: LeafIndex,
}

impl LeafSet {
    pub fn open(dir: &Path, file_index: u32) -> Result<Self, MmrError> {
        let path = Self::path(dir, file_index);
        let base_bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(MmrError::Io(err)),
        };

        let next_leaf = if base_bytes.len() >= 8 {
            let mut prefix = [0u8; 8];
            prefix.copy_from_slice(&base_bytes[..8]);
            LeafIndex::at(u64::from_be_bytes(prefix))
        } else {
            LeafIndex::at(0)
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            base_bytes,
            modified_bytes: BTreeMap::new(),
            next_leaf,
        })
    }

    pub fn path(dir: &Path, file_index: u32) -> PathBuf {
        dir.join(format!("leaf{file_index:06}.dat"))
    }

    fn set_byte(&mut self, byte_idx: u64, value: u8) {
        self.modified_bytes.insert(byte_idx + BITS_OFFSET, value);
    }
}

impl LeafSetOps for LeafSet {
    fn add(&mut self, idx: &LeafIndex) {
        let (byte_idx, mask) = bit_mask(idx);
        let byte = self.get_byte(byte_idx) | mask;
        self.set_byte(byte_idx, byte);
        if *idx >= self.next_leaf {
            self.next_leaf = idx.next();
        }
    }

    fn remove(&mut self, idx: &LeafIndex) {
        let (byte_idx, mask) = bit_mask(idx);
        let byte = self.get_byte(byte_idx) & !mask;
        self.set_byte(byte_idx, byte);
    }

    fn contains(&self, idx: &LeafIndex) -> bool {
        let (byte_idx, mask) = bit_mask(idx);
        self.get_byte(byte_idx) & mask != 0
    }

    fn next_leaf_index(&self) -> LeafIndex {
        self.next_leaf
    }

    fn get_byte(&self, byte_idx: u64) -> u8 {
        let offset = byte_idx + BITS_OFFSET;
        if let Some(byte) = self.modified_bytes.get(&offset) {
            return *byte;
        }
        self.base_bytes
            .get(offset as usize)
            .copied()
            .unwrap_or(0)
    }

    fn rewind(&mut self, num_leaves: u64, leaves_to_restore: &[LeafIndex]) {
        for idx in leaves_to_restore {
            self.add(idx);
        }
        for leaf in num_leaves..self.next_leaf.get() {
            self.remove(&LeafIndex::at(leaf));
        }
        self.next_leaf = LeafIndex::at(num_leaves);
    }

    fn root(&self) -> Hash256 {
        hashed_bytes(&packed_bytes(self))
    }

    fn flush(&mut self, file_index: u32) -> Result<(), MmrError> {
        // Materialize base + overlay into a fresh generation image.
        let mut image = self.base_bytes.clone();
        if image.len() < BITS_OFFSET as usize {
            image.resize(BITS_OFFSET as usize, 0);
        }
        image[..8].copy_from_slice(&self.next_leaf.get().to_be_bytes());
        for (offset, byte) in &self.modified_bytes {
            let offset = *offset as usize;
            if image.len() <= offset {
                image.resize(offset + 1, 0);
            }
            image[offset] = *byte;
        }

        fs::create_dir_all(&self.dir)?;
        fs::write(Self::path(&self.dir, file_index), &image)?;

        self.base_bytes = image;
        self.modified_bytes.clear();
        Ok(())
    }

    fn apply_updates(
        &mut self,
        file_index: u32,
        next_leaf: LeafIndex,
        modified_bytes: &BTreeMap<u64, u8>,
    ) -> Result<(), MmrError> {
        for (byte_idx, byte) in modified_bytes {
            self.modified_bytes.insert(byte_idx + BITS_OFFSET, *byte);
        }

        // In case of rewind, clear everything above the new next.
        for leaf in next_leaf.get()..self.next_leaf.get() {
            self.remove(&LeafIndex::at(leaf));
        }
        self.next_leaf = next_leaf;

        self.flush(file_index)
    }
}

/// Overlay leafset layered on a shared base, for speculative views.
pub struct LeafSetCache {
    base: SharedLeafSet,
    modified_bytes: BTreeMap<u64, u8>,
    next_leaf: LeafIndex,
}

impl LeafSetCache {
    pub fn new(base: SharedLeafSet) -> Self {
        let next_leaf = base.read().expect("leafset lock").next_leaf_index();
        Self {
            base,
            modified_bytes: BTreeMap::new(),
            next_leaf,
        }
    }

    /// Push this cache's changes into the base and flush it as
    /// generation `file_index`.
    pub fn flush_to_base(&mut self, file_index: u32) -> Result<(), MmrError> {
        self.base.write().expect("leafset lock").apply_updates(
            file_index,
            self.next_leaf,
            &self.modified_bytes,
        )?;
        self.modified_bytes.clear();
        Ok(())
    }

    fn set_byte(&mut self, byte_idx: u64, value: u8) {
        self.modified_bytes.insert(byte_idx, value);
    }
}

impl LeafSetOps for LeafSetCache {
    fn add(&mut self, idx: &LeafIndex) {
        let (byte_idx, mask) = bit_mask(idx);
        let byte = self.get_byte(byte_idx) | mask;
        self.set_byte(byte_idx, byte);
        if *idx >= self.next_leaf {
            self.next_leaf = idx.next();
        }
    }

    fn remove(&mut self, idx: &LeafIndex) {
        let (byte_idx, mask) = bit_mask(idx);
        let byte = self.get_byte(byte_idx) & !mask;
        self.set_byte(byte_idx, byte);
    }

    fn contains(&self, idx: &LeafIndex) -> bool {
        let (byte_idx, mask) = bit_mask(idx);
        self.get_byte(byte_idx) & mask != 0
    }

    fn next_leaf_index(&self) -> LeafIndex {
        self.next_leaf
    }

    fn get_byte(&self, byte_idx: u64) -> u8 {
        if let Some(byte) = self.modified_bytes.get(&byte_idx) {
            return *byte;
        }
        self.base.read().expect("leafset lock").get_byte(byte_idx)
    }

    fn rewind(&mut self, num_leaves: u64, leaves_to_restore: &[LeafIndex]) {
        for idx in leaves_to_restore {
            self.add(idx);
        }
        for leaf in num_leaves..self.next_leaf.get() {
            self.remove(&LeafIndex::at(leaf));
        }
        self.next_leaf = LeafIndex::at(num_leaves);
    }

    fn root(&self) -> Hash256 {
        hashed_bytes(&packed_bytes(self))
    }

    fn flush(&mut self, file_index: u32) -> Result<(), MmrError> {
        self.flush_to_base(file_index)
    }

    fn apply_updates(
        &mut self,
        _file_index: u32,
        next_leaf: LeafIndex,
        modified_bytes: &BTreeMap<u64, u8>,
    ) -> Result<(), MmrError> {
        for (byte_idx, byte) in modified_bytes {
            self.modified_bytes.insert(*byte_idx, *byte);
        }
        for leaf in next_leaf.get()..self.next_leaf.get() {
            self.remove(&LeafIndex::at(leaf));
        }
        self.next_leaf = next_leaf;
        Ok(())
    }
}
