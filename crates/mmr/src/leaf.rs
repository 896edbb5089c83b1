//! MMR leaves.

use mweb_consensus::Hash256;
use mweb_primitives::encoding::Encoder;
use mweb_primitives::hash::hashed_bytes;

use crate::index::{Index, LeafIndex};

/// A leaf's payload together with its position-bound hash.
///
/// The hash commits to the leaf index, so the same payload at a
/// different position hashes differently.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Leaf {
    index: LeafIndex,
    data: Vec<u8>,
    hash: Hash256,
}

impl Leaf {
    pub fn create(index: LeafIndex, data: Vec<u8>) -> Self {
        let mut encoder = Encoder::new();
        encoder.write_u64_be(index.get());
        encoder.write_bytes(&data);
        let hash = hashed_bytes(&encoder.into_inner());

        Self { index, data, hash }
    }

    pub fn leaf_index(&self) -> LeafIndex {
        self.index
    }

    pub fn node_index(&self) -> Index {
        self.index.node_index()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_commits_to_position() {
        let a = Leaf::create(LeafIndex::at(0), vec![1, 2, 3]);
        let b = Leaf::create(LeafIndex::at(1), vec![1, 2, 3]);
        assert_ne!(a.hash(), b.hash());

        let a_again = Leaf::create(LeafIndex::at(0), vec![1, 2, 3]);
        assert_eq!(a.hash(), a_again.hash());
    }
}
