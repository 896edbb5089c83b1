//! Durable storage behind one MMR: an append-only hash log plus a leaf
//! blob store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mweb_consensus::Hash256;
use mweb_storage::{Column, KeyValueStore, WriteBatch};

use crate::hash_file::{mmr_file_path, HashFile};
use crate::index::{Index, LeafIndex};
use crate::leaf::Leaf;
use crate::node::spine_hashes;
use crate::prunelist::PruneList;
use crate::MmrError;

pub trait Backend: Send + Sync {
    /// Append a leaf: its hash plus every newly-completed ancestor.
    fn add_leaf(&mut self, leaf: Leaf) -> Result<(), MmrError>;

    /// Truncate to the state just before `next_leaf` was added.
    fn rewind(&mut self, next_leaf: LeafIndex) -> Result<(), MmrError>;

    /// Number of leaves, pruned or not.
    fn num_leaves(&self) -> u64;

    fn next_leaf(&self) -> LeafIndex {
        LeafIndex::at(self.num_leaves())
    }

    fn hash_at(&self, idx: &Index) -> Result<Hash256, MmrError>;

    fn leaf_at(&self, idx: &LeafIndex) -> Result<Leaf, MmrError>;

    /// Persist: hash log to generation `file_index`, uncommitted leaf
    /// blobs into the batch.
    fn commit(&mut self, file_index: u32, batch: &mut WriteBatch) -> Result<(), MmrError>;
}

/// Purely in-memory backend, used by tests and by state rebuilds.
#[derive(Debug, Default)]
pub struct VectorBackend {
    leaves: Vec<Leaf>,
    nodes: Vec<Hash256>,
}

impl VectorBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for VectorBackend {
    fn add_leaf(&mut self, leaf: Leaf) -> Result<(), MmrError> {
        let hashes = spine_hashes(&leaf, |idx| {
            self.nodes
                .get(idx.position() as usize)
                .copied()
                .ok_or(MmrError::NotFound)
        })?;
        self.nodes.extend(hashes);
        self.leaves.push(leaf);
        Ok(())
    }

    fn rewind(&mut self, next_leaf: LeafIndex) -> Result<(), MmrError> {
        self.leaves.truncate(next_leaf.get() as usize);
        self.nodes.truncate(next_leaf.position() as usize);
        Ok(())
    }

    fn num_leaves(&self) -> u64 {
        self.leaves.len() as u64
    }

    fn hash_at(&self, idx: &Index) -> Result<Hash256, MmrError> {
        self.nodes
            .get(idx.position() as usize)
            .copied()
            .ok_or(MmrError::NotFound)
    }

    fn leaf_at(&self, idx: &LeafIndex) -> Result<Leaf, MmrError> {
        self.leaves
            .get(idx.get() as usize)
            .cloned()
            .ok_or(MmrError::NotFound)
    }

    fn commit(&mut self, _file_index: u32, _batch: &mut WriteBatch) -> Result<(), MmrError> {
        Ok(())
    }
}

/// Key for a leaf blob: the big-endian leaf index.
fn leaf_key(idx: &LeafIndex) -> [u8; 8] {
    idx.get().to_be_bytes()
}

/// File- and database-backed MMR storage.
///
/// Hashes live in `{prefix}{g:06}.dat`; leaf payloads live in the KV
/// store under `column`. An optional prune list translates logical node
/// positions into physical hash-log offsets.
pub struct FileBackend {
    column: Column,
    prefix: char,
    dir: PathBuf,
    hash_file: HashFile,
    leaves: Vec<Leaf>,
    leaf_map: BTreeMap<u64, usize>,
    store: Arc<dyn KeyValueStore>,
    prune_list: Option<Arc<PruneList>>,
}

impl FileBackend {
    pub fn open(
        column: Column,
        prefix: char,
        dir: &Path,
        file_index: u32,
        store: Arc<dyn KeyValueStore>,
        prune_list: Option<Arc<PruneList>>,
    ) -> Result<Self, MmrError> {
        let hash_file = HashFile::open(&mmr_file_path(dir, prefix, file_index))?;
        Ok(Self {
            column,
            prefix,
            dir: dir.to_path_buf(),
            hash_file,
            leaves: Vec::new(),
            leaf_map: BTreeMap::new(),
            store,
            prune_list,
        })
    }

    fn shift_at(&self, position: u64) -> u64 {
        self.prune_list
            .as_ref()
            .map(|p| p.shift_at(position))
            .unwrap_or(0)
    }

    /// Physically rewrite the hash log without the marked entries,
    /// written as generation `file_index`.
    ///
    /// `hashes_to_remove` is indexed by physical log offset. The caller
    /// must install the matching prune list for lookups to keep
    /// translating correctly.
    pub fn compact(
        &mut self,
        file_index: u32,
        hashes_to_remove: &crate::bitset::BitSet,
    ) -> Result<(), MmrError> {
        let mut compacted = HashFile::default();
        for pos in 0..self.hash_file.num_hashes() {
            if hashes_to_remove.test(pos) {
                continue;
            }
            let hash = self.hash_file.hash_at(pos).ok_or(MmrError::NotFound)?;
            compacted.append(&hash);
        }

        compacted.commit(&mmr_file_path(&self.dir, self.prefix, file_index))?;
        self.hash_file = compacted;
        Ok(())
    }

    /// Replace the prune list, e.g. after a compaction pass.
    pub fn set_prune_list(&mut self, prune_list: Option<Arc<PruneList>>) {
        self.prune_list = prune_list;
    }
}

impl Backend for FileBackend {
    fn add_leaf(&mut self, leaf: Leaf) -> Result<(), MmrError> {
        let hashes = spine_hashes(&leaf, |idx| self.hash_at(&idx))?;
        for hash in &hashes {
            self.hash_file.append(hash);
        }
        self.leaf_map.insert(leaf.leaf_index().get(), self.leaves.len());
        self.leaves.push(leaf);
        Ok(())
    }

    fn rewind(&mut self, next_leaf: LeafIndex) -> Result<(), MmrError> {
        let position = next_leaf.position();
        let physical = position - self.shift_at(position);
        self.hash_file.rewind(physical);

        self.leaf_map.retain(|leaf_idx, _| *leaf_idx < next_leaf.get());
        self.leaves.retain(|leaf| leaf.leaf_index() < next_leaf);
        Ok(())
    }

    fn num_leaves(&self) -> u64 {
        let mut num_hashes = self.hash_file.num_hashes();
        if let Some(prune_list) = &self.prune_list {
            num_hashes += prune_list.total_shift();
        }
        Index::at(num_hashes).leaf_index()
    }

    fn hash_at(&self, idx: &Index) -> Result<Hash256, MmrError> {
        if let Some(prune_list) = &self.prune_list {
            if prune_list.is_pruned(idx) {
                return Err(MmrError::NotFound);
            }
        }
        let physical = idx.position() - self.shift_at(idx.position());
        self.hash_file.hash_at(physical).ok_or(MmrError::NotFound)
    }

    fn leaf_at(&self, idx: &LeafIndex) -> Result<Leaf, MmrError> {
        if let Some(vec_idx) = self.leaf_map.get(&idx.get()) {
            return Ok(self.leaves[*vec_idx].clone());
        }

        match self.store.get(self.column, &leaf_key(idx))? {
            Some(data) => Ok(Leaf::create(*idx, data)),
            None => Err(MmrError::NotFound),
        }
    }

    fn commit(&mut self, file_index: u32, batch: &mut WriteBatch) -> Result<(), MmrError> {
        self.hash_file
            .commit(&mmr_file_path(&self.dir, self.prefix, file_index))?;

        for leaf in &self.leaves {
            batch.put(self.column, leaf_key(&leaf.leaf_index()), leaf.data().to_vec());
        }
        self.leaves.clear();
        self.leaf_map.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mweb_storage::memory::MemoryStore;

    #[test]
    fn file_backend_appends_and_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let mut backend = FileBackend::open(
            Column::KernelLeaf,
            'K',
            dir.path(),
            0,
            Arc::clone(&store),
            None,
        )
        .unwrap();

        for i in 0u8..4 {
            backend
                .add_leaf(Leaf::create(LeafIndex::at(i as u64), vec![i]))
                .unwrap();
        }
        assert_eq!(backend.num_leaves(), 4);

        let mut batch = WriteBatch::new();
        backend.commit(1, &mut batch).unwrap();
        store.write_batch(&batch).unwrap();

        let reloaded = FileBackend::open(
            Column::KernelLeaf,
            'K',
            dir.path(),
            1,
            Arc::clone(&store),
            None,
        )
        .unwrap();
        assert_eq!(reloaded.num_leaves(), 4);
        assert_eq!(reloaded.leaf_at(&LeafIndex::at(2)).unwrap().data(), &[2]);
        assert_eq!(
            reloaded.hash_at(&Index::at(2)).unwrap(),
            backend.hash_at(&Index::at(2)).unwrap()
        );
    }

    #[test]
    fn compact_rewrites_hash_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let mut backend = FileBackend::open(
            Column::OutputLeaf,
            'O',
            dir.path(),
            0,
            Arc::clone(&store),
            None,
        )
        .unwrap();
        for i in 0u8..4 {
            backend
                .add_leaf(Leaf::create(LeafIndex::at(i as u64), vec![i]))
                .unwrap();
        }
        // 4 leaves build 7 nodes; position 6 is the single peak.
        let peak_before = backend.hash_at(&Index::at(6)).unwrap();

        // Remove leaves 0 and 1 (physical positions 0 and 1); their
        // parent at position 2 stays.
        let mut to_remove = crate::bitset::BitSet::with_len(7);
        to_remove.set(0);
        to_remove.set(1);
        backend.compact(1, &to_remove).unwrap();

        let mut prune_bits = crate::bitset::BitSet::with_len(7);
        prune_bits.set(0);
        prune_bits.set(1);
        backend.set_prune_list(Some(Arc::new(crate::prunelist::PruneList::from_bitset(
            prune_bits,
        ))));

        assert_eq!(backend.num_leaves(), 4);
        assert!(matches!(
            backend.hash_at(&Index::at(0)),
            Err(MmrError::NotFound)
        ));
        // Retained positions still resolve through the shift.
        assert_eq!(backend.hash_at(&Index::at(6)).unwrap(), peak_before);
    }

    #[test]
    fn missing_leaf_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let backend =
            FileBackend::open(Column::OutputLeaf, 'O', dir.path(), 0, store, None).unwrap();
        assert!(matches!(
            backend.leaf_at(&LeafIndex::at(0)),
            Err(MmrError::NotFound)
        ));
    }
}
