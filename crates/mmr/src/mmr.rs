//! The MMR proper: append, lookup, rewind, root computation, and the
//! uncommitted cache overlay.

use std::sync::{Arc, RwLock};

use mweb_consensus::Hash256;
use mweb_log::log_trace;
use mweb_primitives::hash::hashed_bytes;
use mweb_storage::WriteBatch;

use crate::backend::Backend;
use crate::index::{Index, LeafIndex};
use crate::leaf::Leaf;
use crate::node::{parent_hash, spine_hashes};
use crate::MmrError;

/// Shared handle to an MMR, allowing caches to layer over a base that
/// outlives them. Mutation discipline is single-writer; the lock only
/// guards against torn reads.
pub type SharedMmr = Arc<RwLock<dyn MmrOps>>;

pub trait MmrOps: Send + Sync {
    /// Append a leaf with the given payload, returning its index.
    fn add_leaf(&mut self, data: Vec<u8>) -> Result<LeafIndex, MmrError>;

    fn leaf(&self, idx: &LeafIndex) -> Result<Leaf, MmrError>;

    fn hash_at(&self, idx: &Index) -> Result<Hash256, MmrError>;

    /// The index of the next leaf to be added.
    fn next_leaf_index(&self) -> LeafIndex;

    fn num_leaves(&self) -> u64 {
        self.next_leaf_index().get()
    }

    /// Shrink back to `num_leaves` leaves, dropping any internal nodes
    /// built past that point.
    fn rewind(&mut self, num_leaves: u64) -> Result<(), MmrError>;

    /// Replace everything from `first_leaf` on with `leaves`, persisting
    /// through `batch` when this is a durable MMR.
    fn batch_write(
        &mut self,
        file_index: u32,
        first_leaf: LeafIndex,
        leaves: &[Leaf],
        batch: &mut WriteBatch,
    ) -> Result<(), MmrError>;

    /// Peak-bagging root: fold the peak hashes right to left, prefixed
    /// by the total node count. An empty MMR hashes the empty string.
    fn root(&self) -> Result<Hash256, MmrError> {
        let size = self.next_leaf_index().position();
        if size == 0 {
            return Ok(hashed_bytes(&[]));
        }

        let mut peak_positions = Vec::new();
        let mut peak_size = fill_ones_to_right(size);
        let mut num_left = size;
        let mut sum_prev_peaks = 0u64;
        while peak_size != 0 {
            if num_left >= peak_size {
                peak_positions.push(sum_prev_peaks + peak_size - 1);
                sum_prev_peaks += peak_size;
                num_left -= peak_size;
            }
            peak_size >>= 1;
        }
        debug_assert_eq!(num_left, 0);

        let mut root: Option<Hash256> = None;
        for peak_position in peak_positions.iter().rev() {
            let peak_hash = self.hash_at(&Index::at(*peak_position))?;
            root = Some(match root {
                None => peak_hash,
                Some(bagged) => parent_hash(size, &peak_hash, &bagged),
            });
        }

        Ok(root.expect("at least one peak when size > 0"))
    }
}

fn fill_ones_to_right(input: u64) -> u64 {
    let mut x = input;
    x |= x >> 1;
    x |= x >> 2;
    x |= x >> 4;
    x |= x >> 8;
    x |= x >> 16;
    x |= x >> 32;
    x
}

/// An MMR bound directly to a backend.
pub struct Mmr<B: Backend> {
    backend: B,
}

impl<B: Backend> Mmr<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Persist the backend's current state as generation `file_index`.
    pub fn commit_backend(
        &mut self,
        file_index: u32,
        batch: &mut WriteBatch,
    ) -> Result<(), MmrError> {
        self.backend.commit(file_index, batch)
    }

    pub fn num_nodes(&self) -> u64 {
        let num_leaves = self.backend.num_leaves();
        if num_leaves == 0 {
            return 0;
        }
        LeafIndex::at(num_leaves).position()
    }
}

impl<B: Backend> MmrOps for Mmr<B> {
    fn add_leaf(&mut self, data: Vec<u8>) -> Result<LeafIndex, MmrError> {
        let leaf_idx = self.backend.next_leaf();
        self.backend.add_leaf(Leaf::create(leaf_idx, data))?;
        Ok(leaf_idx)
    }

    fn leaf(&self, idx: &LeafIndex) -> Result<Leaf, MmrError> {
        self.backend.leaf_at(idx)
    }

    fn hash_at(&self, idx: &Index) -> Result<Hash256, MmrError> {
        self.backend.hash_at(idx)
    }

    fn next_leaf_index(&self) -> LeafIndex {
        self.backend.next_leaf()
    }

    fn rewind(&mut self, num_leaves: u64) -> Result<(), MmrError> {
        log_trace!("mmr: rewinding to {num_leaves}");
        self.backend.rewind(LeafIndex::at(num_leaves))
    }

    fn batch_write(
        &mut self,
        file_index: u32,
        first_leaf: LeafIndex,
        leaves: &[Leaf],
        batch: &mut WriteBatch,
    ) -> Result<(), MmrError> {
        log_trace!(
            "mmr: writing batch {file_index} with first leaf {}",
            first_leaf.get()
        );
        self.backend.rewind(first_leaf)?;
        for leaf in leaves {
            self.backend.add_leaf(leaf.clone())?;
        }
        self.backend.commit(file_index, batch)
    }
}

/// Buffered overlay over a base MMR.
///
/// Appends accumulate in memory; reads below the cache window delegate
/// to the base. `flush` hands the buffered leaves to the base's
/// `batch_write` and resets the window.
pub struct MmrCache {
    base: SharedMmr,
    first_leaf: LeafIndex,
    leaves: Vec<Leaf>,
    nodes: Vec<Hash256>,
}

impl MmrCache {
    pub fn new(base: SharedMmr) -> Self {
        let first_leaf = base.read().expect("mmr lock").next_leaf_index();
        Self {
            base,
            first_leaf,
            leaves: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn flush(&mut self, file_index: u32, batch: &mut WriteBatch) -> Result<(), MmrError> {
        log_trace!(
            "mmr cache: flushing {} leaves at {} with file index {file_index}",
            self.leaves.len(),
            self.first_leaf.get()
        );
        self.base.write().expect("mmr lock").batch_write(
            file_index,
            self.first_leaf,
            &self.leaves,
            batch,
        )?;
        self.first_leaf = self.next_leaf_index();
        self.leaves.clear();
        self.nodes.clear();
        Ok(())
    }
}

impl MmrOps for MmrCache {
    fn add_leaf(&mut self, data: Vec<u8>) -> Result<LeafIndex, MmrError> {
        let leaf_idx = LeafIndex::at(self.first_leaf.get() + self.leaves.len() as u64);
        let leaf = Leaf::create(leaf_idx, data);

        let first_position = self.first_leaf.position();
        let hashes = spine_hashes(&leaf, |idx| {
            if idx.position() < first_position {
                self.base.read().expect("mmr lock").hash_at(&idx)
            } else {
                self.nodes
                    .get((idx.position() - first_position) as usize)
                    .copied()
                    .ok_or(MmrError::NotFound)
            }
        })?;

        self.nodes.extend(hashes);
        self.leaves.push(leaf);
        Ok(leaf_idx)
    }

    fn leaf(&self, idx: &LeafIndex) -> Result<Leaf, MmrError> {
        if *idx < self.first_leaf {
            return self.base.read().expect("mmr lock").leaf(idx);
        }

        let cache_idx = (idx.get() - self.first_leaf.get()) as usize;
        self.leaves.get(cache_idx).cloned().ok_or(MmrError::NotFound)
    }

    fn hash_at(&self, idx: &Index) -> Result<Hash256, MmrError> {
        let first_position = self.first_leaf.position();
        if idx.position() < first_position {
            return self.base.read().expect("mmr lock").hash_at(idx);
        }

        self.nodes
            .get((idx.position() - first_position) as usize)
            .copied()
            .ok_or(MmrError::NotFound)
    }

    fn next_leaf_index(&self) -> LeafIndex {
        match self.leaves.last() {
            None => self.first_leaf,
            Some(leaf) => leaf.leaf_index().next(),
        }
    }

    fn rewind(&mut self, num_leaves: u64) -> Result<(), MmrError> {
        log_trace!("mmr cache: rewinding to {num_leaves}");

        let next_leaf = LeafIndex::at(num_leaves);
        if next_leaf <= self.first_leaf {
            self.first_leaf = next_leaf;
            self.leaves.clear();
            self.nodes.clear();
        } else if !self.leaves.is_empty() {
            self.leaves.retain(|leaf| leaf.leaf_index() < next_leaf);

            let num_nodes = self.next_leaf_index().position() - self.first_leaf.position();
            self.nodes.truncate(num_nodes as usize);
        }
        Ok(())
    }

    fn batch_write(
        &mut self,
        _file_index: u32,
        first_leaf: LeafIndex,
        leaves: &[Leaf],
        _batch: &mut WriteBatch,
    ) -> Result<(), MmrError> {
        log_trace!("mmr cache: writing batch at {}", first_leaf.get());
        self.rewind(first_leaf.get())?;
        for leaf in leaves {
            self.add_leaf(leaf.data().to_vec())?;
        }
        Ok(())
    }
}
