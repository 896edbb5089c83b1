//! Pruning and compaction bitset computation.
//!
//! MMR nodes of one height are not contiguous in the flat array, so
//! bottom-up passes walk each height with [`SiblingIter`], whose stride
//! is `2^(h+1) - 1` plus a correction for each completed subtree
//! boundary crossed.

use crate::bitset::BitSet;
use crate::index::{Index, LeafIndex};

/// Iterates all node positions of a fixed height in ascending order,
/// up to and including `last_node`.
pub struct SiblingIter {
    height: u64,
    last_node: u64,
    base_inc: u64,
    sibling_num: u64,
    next_pos: u64,
}

impl SiblingIter {
    pub fn new(height: u64, last_node: Index) -> Self {
        Self {
            height,
            last_node: last_node.position(),
            base_inc: (1u64 << (height + 1)) - 1,
            sibling_num: 0,
            next_pos: 0,
        }
    }

    pub fn next_sibling(&mut self) -> Option<Index> {
        if self.sibling_num == 0 {
            self.next_pos = self.base_inc - 1;
        } else {
            let increment = self.base_inc + u64::from(self.sibling_num.trailing_zeros());
            self.next_pos += increment;
        }
        self.sibling_num += 1;

        if self.next_pos <= self.last_node {
            Some(Index::with_height(self.next_pos, self.height))
        } else {
            None
        }
    }
}

/// Positions that can be physically removed from the hash log: spent
/// leaves, and internal nodes whose children are both removable.
pub fn build_compact_bitset(num_leaves: u64, unspent_leaf_indices: &BitSet) -> BitSet {
    let mut compactable = BitSet::with_len(num_leaves * 2);
    if num_leaves == 0 {
        return compactable;
    }

    let mut prunable = BitSet::with_len(num_leaves * 2);
    for leaf in 0..num_leaves {
        if !unspent_leaf_indices.test(leaf) {
            prunable.set(LeafIndex::at(leaf).position());
        }
    }

    let next_leaf_pos = LeafIndex::at(num_leaves).position();
    let last_node = Index::at(next_leaf_pos - 1);

    let mut height = 1u64;
    while (1u64 << (height + 1)) - 2 <= next_leaf_pos {
        let mut iter = SiblingIter::new(height, last_node);
        while let Some(node) = iter.next_sibling() {
            let right_child = node.right_child();
            if prunable.test(right_child.position()) {
                let left_child = node.left_child();
                if prunable.test(left_child.position()) {
                    compactable.set(right_child.position());
                    compactable.set(left_child.position());
                    prunable.set(node.position());
                }
            }
        }

        height += 1;
    }

    compactable
}

/// Positions newly compactable since `prev_compact`, as a dense bitset
/// over the not-previously-compacted positions.
pub fn diff_compact_bitset(prev_compact: &BitSet, new_compact: &BitSet) -> BitSet {
    let mut diff = BitSet::new();
    for i in 0..new_compact.len() {
        if prev_compact.test(i) {
            debug_assert!(new_compact.test(i));
            continue;
        }
        diff.push(new_compact.test(i));
    }
    diff
}

/// The minimal set of parent hashes that must be retained alongside the
/// unspent leaves to rebuild the full tree.
///
/// Starts from the spent-leaf positions and folds sibling pairs upward:
/// once both children are droppable, only the parent hash is kept.
pub fn calc_pruned_parents(unspent_leaf_indices: &BitSet) -> BitSet {
    let num_leaves = unspent_leaf_indices.len();
    let mut retained = BitSet::with_len(num_leaves * 2);
    if num_leaves == 0 {
        return retained;
    }

    for leaf in 0..num_leaves {
        if !unspent_leaf_indices.test(leaf) {
            retained.set(LeafIndex::at(leaf).position());
        }
    }

    let last_node = LeafIndex::at(num_leaves).node_index();

    let mut height = 1u64;
    while (1u64 << (height + 1)) - 2 <= last_node.position() {
        let mut iter = SiblingIter::new(height, last_node);
        while let Some(node) = iter.next_sibling() {
            let right_child = node.right_child();
            if retained.test(right_child.position()) {
                let left_child = node.left_child();
                if retained.test(left_child.position()) {
                    retained.set_to(right_child.position(), false);
                    retained.set_to(left_child.position(), false);
                    retained.set(node.position());
                }
            }
        }

        height += 1;
    }

    retained
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn collect_positions(height: u64, last_node: u64) -> Vec<u64> {
        let mut iter = SiblingIter::new(height, Index::at(last_node));
        let mut positions = Vec::new();
        while let Some(idx) = iter.next_sibling() {
            positions.push(idx.position());
        }
        positions
    }

    #[test]
    fn sibling_iter_height_0() {
        assert_eq!(
            collect_positions(0, 22),
            vec![0, 1, 3, 4, 7, 8, 10, 11, 15, 16, 18, 19, 22]
        );
    }

    #[test]
    fn sibling_iter_height_1() {
        assert_eq!(
            collect_positions(1, 84),
            vec![
                2, 5, 9, 12, 17, 20, 24, 27, 33, 36, 40, 43, 48, 51, 55, 58, 65, 68, 72, 75, 80,
                83
            ]
        );
    }

    #[test]
    fn sibling_iter_height_2() {
        assert_eq!(
            collect_positions(2, 100),
            vec![6, 13, 21, 28, 37, 44, 52, 59, 69, 76, 84, 91, 100]
        );
    }

    #[test]
    fn sibling_iter_covers_every_position_once() {
        let last_node = 2500u64;
        let mut found: HashSet<u64> = HashSet::new();
        for height in 0..=12u64 {
            let mut iter = SiblingIter::new(height, Index::at(last_node));
            while let Some(idx) = iter.next_sibling() {
                assert_eq!(Index::at(idx.position()).height(), height);
                assert!(found.insert(idx.position()));
            }
        }
        for position in 0..=last_node {
            assert!(found.contains(&position), "missing {position}");
        }
    }

    fn reference_unspent() -> BitSet {
        let mut unspent = BitSet::with_len(50);
        unspent.set(2);
        unspent.set(9);
        unspent.set(26);
        unspent.set(27);
        for i in 30..50 {
            unspent.set(i);
        }
        unspent
    }

    #[test]
    fn compact_bitset_reference_vector() {
        let compactable = build_compact_bitset(50, &reference_unspent());
        assert_eq!(
            compactable.to_bit_string(),
            "1100000111111000001100111111000111111111111110110000011000000000000000000000000000000000000000000000"
        );
        assert_eq!(compactable.count(), 34);
    }

    #[test]
    fn diff_compact_reference_vector() {
        let mut prev = BitSet::with_len(10);
        prev.set_range(0, 5, true);

        let mut new = BitSet::with_len(20);
        new.set_range(0, 5, true);
        new.set_range(8, 10, true);

        let diff = diff_compact_bitset(&prev, &new);
        assert_eq!(diff.len(), 15);
        assert_eq!(diff.to_bit_string(), "000111111111100");
    }

    #[test]
    fn pruned_parents_reference_vector() {
        let retained = calc_pruned_parents(&reference_unspent());
        assert_eq!(
            retained.to_bit_string(),
            "0010100000000101000010000000100000000000000001001000000100000000000000000000000000000000000000000000"
        );
    }
}
