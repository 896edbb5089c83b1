//! Rebuild a full MMR backend from a compact state snapshot: the
//! unspent leaves plus the retained pruned-parent hashes.

use std::path::Path;
use std::sync::Arc;

use mweb_consensus::Hash256;
use mweb_storage::{Column, KeyValueStore, WriteBatch};

use crate::backend::FileBackend;
use crate::bitset::BitSet;
use crate::hash_file::{mmr_file_path, HashFile};
use crate::index::Index;
use crate::leaf::Leaf;
use crate::mmr::Mmr;
use crate::node::parent_hash;
use crate::prunelist::PruneList;
use crate::util::calc_pruned_parents;
use crate::MmrError;

/// Recompute every non-compacted hash, in hash-log order, from the
/// unspent leaves and the pruned-parent hashes.
///
/// The result is exactly the physical content of the compacted hash
/// log: present positions are unspent leaf hashes, retained parents,
/// and every ancestor recomputable from them.
pub fn calc_hashes(
    unspent_leaf_indices: &BitSet,
    unspent_leaves: &[Leaf],
    pruned_parent_hashes: &[Hash256],
) -> Result<Vec<Hash256>, MmrError> {
    if unspent_leaves.len() as u64 != unspent_leaf_indices.count() {
        return Err(MmrError::Corrupt("unspent leaf count mismatch"));
    }

    let pruned_parent_indices = calc_pruned_parents(unspent_leaf_indices);
    if (pruned_parent_hashes.len() as u64) < pruned_parent_indices.count() {
        return Err(MmrError::Corrupt("missing pruned parent hashes"));
    }

    let num_nodes = unspent_leaf_indices.len() * 2;
    let mut hash_bitset = BitSet::with_len(num_nodes);
    let mut hashes: Vec<Hash256> = Vec::new();

    let mut index = Index::at(0);
    while index.position() < num_nodes {
        let pos = index.position();
        if index.is_leaf() && unspent_leaf_indices.test(index.leaf_index()) {
            let leaf_idx = unspent_leaf_indices.rank(index.leaf_index()) as usize;
            let leaf = &unspent_leaves[leaf_idx];
            if leaf.leaf_index().get() != index.leaf_index() {
                return Err(MmrError::Corrupt("unspent leaves out of order"));
            }
            hashes.push(*leaf.hash());
            hash_bitset.set(pos);
        } else if pruned_parent_indices.test(pos) {
            let parent_idx = pruned_parent_indices.rank(pos) as usize;
            let hash = pruned_parent_hashes
                .get(parent_idx)
                .ok_or(MmrError::Corrupt("missing pruned parent hash"))?;
            hashes.push(*hash);
            hash_bitset.set(pos);
        } else if !index.is_leaf() {
            let left_pos = index.left_child().position();
            let right_pos = index.right_child().position();
            if hash_bitset.test(left_pos) && hash_bitset.test(right_pos) {
                let left_hash = hashes[hash_bitset.rank(left_pos) as usize];
                let right_hash = hashes[hash_bitset.rank(right_pos) as usize];
                hashes.push(parent_hash(pos, &left_hash, &right_hash));
                hash_bitset.set(pos);
            }
        }

        index = index.next();
    }

    Ok(hashes)
}

/// Write the rebuilt hash log as generation `file_index`, store the
/// leaf payloads, and open a file-backed MMR over the result.
#[allow(clippy::too_many_arguments)]
pub fn build(
    column: Column,
    prefix: char,
    dir: &Path,
    file_index: u32,
    store: Arc<dyn KeyValueStore>,
    batch: &mut WriteBatch,
    prune_list: Option<Arc<PruneList>>,
    unspent_leaf_indices: &BitSet,
    unspent_leaves: Vec<Leaf>,
    pruned_parent_hashes: &[Hash256],
) -> Result<Mmr<FileBackend>, MmrError> {
    let hashes = calc_hashes(unspent_leaf_indices, &unspent_leaves, pruned_parent_hashes)?;

    let mut hash_file = HashFile::default();
    for hash in &hashes {
        hash_file.append(hash);
    }
    hash_file.commit(&mmr_file_path(dir, prefix, file_index))?;

    for leaf in &unspent_leaves {
        batch.put(
            column,
            leaf.leaf_index().get().to_be_bytes(),
            leaf.data().to_vec(),
        );
    }

    let backend = FileBackend::open(column, prefix, dir, file_index, store, prune_list)?;
    Ok(Mmr::new(backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, VectorBackend};
    use crate::index::LeafIndex;
    use crate::mmr::MmrOps;
    use crate::util::build_compact_bitset;
    use mweb_storage::memory::MemoryStore;

    fn full_mmr_and_leaves(num_leaves: u64) -> (Mmr<VectorBackend>, Vec<Leaf>) {
        let mut full = Mmr::new(VectorBackend::new());
        let mut leaves = Vec::new();
        for i in 0..num_leaves {
            let data = vec![i as u8, 0xaa];
            leaves.push(Leaf::create(LeafIndex::at(i), data.clone()));
            full.add_leaf(data).unwrap();
        }
        (full, leaves)
    }

    fn unspent_bitset(num_leaves: u64, spent: &[u64]) -> BitSet {
        let mut unspent = BitSet::with_len(num_leaves);
        for i in 0..num_leaves {
            if !spent.contains(&i) {
                unspent.set(i);
            }
        }
        unspent
    }

    /// The rebuilt hash log contains exactly the non-compactable
    /// positions of the full MMR, in order.
    #[test]
    fn rebuilt_hashes_are_the_compacted_log() {
        let num_leaves = 11u64;
        let (full, leaves) = full_mmr_and_leaves(num_leaves);
        let unspent = unspent_bitset(num_leaves, &[0, 1, 4, 7, 8]);

        let unspent_leaves: Vec<Leaf> = leaves
            .iter()
            .filter(|leaf| unspent.test(leaf.leaf_index().get()))
            .cloned()
            .collect();

        let retained = calc_pruned_parents(&unspent);
        let mut pruned_parent_hashes = Vec::new();
        for pos in 0..retained.len() {
            if retained.test(pos) {
                pruned_parent_hashes.push(full.hash_at(&Index::at(pos)).unwrap());
            }
        }

        let hashes = calc_hashes(&unspent, &unspent_leaves, &pruned_parent_hashes).unwrap();

        let compactable = build_compact_bitset(num_leaves, &unspent);
        let total_nodes = LeafIndex::at(num_leaves).position();
        let mut expected = Vec::new();
        for pos in 0..total_nodes {
            if !compactable.test(pos) {
                expected.push(full.hash_at(&Index::at(pos)).unwrap());
            }
        }
        assert_eq!(hashes, expected);
    }

    /// Pruning safety: a file backend over the compacted log plus the
    /// prune list reproduces the original root.
    #[test]
    fn compacted_backend_reproduces_root() {
        let num_leaves = 11u64;
        let (full, leaves) = full_mmr_and_leaves(num_leaves);
        let unspent = unspent_bitset(num_leaves, &[0, 1, 4, 7, 8]);

        let unspent_leaves: Vec<Leaf> = leaves
            .iter()
            .filter(|leaf| unspent.test(leaf.leaf_index().get()))
            .cloned()
            .collect();

        let retained = calc_pruned_parents(&unspent);
        let mut pruned_parent_hashes = Vec::new();
        for pos in 0..retained.len() {
            if retained.test(pos) {
                pruned_parent_hashes.push(full.hash_at(&Index::at(pos)).unwrap());
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let prune_list = Arc::new(PruneList::from_bitset(build_compact_bitset(
            num_leaves, &unspent,
        )));

        let mut batch = WriteBatch::new();
        let rebuilt = build(
            Column::OutputLeaf,
            'O',
            dir.path(),
            1,
            Arc::clone(&store),
            &mut batch,
            Some(prune_list),
            &unspent,
            unspent_leaves,
            &pruned_parent_hashes,
        )
        .unwrap();
        store.write_batch(&batch).unwrap();

        assert_eq!(rebuilt.num_leaves(), num_leaves);
        assert_eq!(rebuilt.root().unwrap(), full.root().unwrap());

        // Unspent leaves are readable; compacted positions are gone.
        assert!(rebuilt.backend().leaf_at(&LeafIndex::at(2)).is_ok());
        assert!(matches!(
            rebuilt.backend().hash_at(&Index::at(0)),
            Err(MmrError::NotFound)
        ));
    }

    #[test]
    fn leaf_count_mismatch_is_rejected() {
        let mut unspent = BitSet::with_len(4);
        unspent.set(0);
        unspent.set(2);
        assert!(matches!(
            calc_hashes(&unspent, &[], &[]),
            Err(MmrError::Corrupt(_))
        ));
    }
}
