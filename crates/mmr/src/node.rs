//! Internal node hashing.

use mweb_consensus::Hash256;
use mweb_primitives::encoding::Encoder;
use mweb_primitives::hash::hashed_bytes;

use crate::index::Index;
use crate::leaf::Leaf;
use crate::MmrError;

/// Hash of an internal node: `H(position ++ left ++ right)`.
pub fn parent_hash(position: u64, left: &Hash256, right: &Hash256) -> Hash256 {
    let mut encoder = Encoder::new();
    encoder.write_u64_be(position);
    encoder.write_bytes(left);
    encoder.write_bytes(right);
    hashed_bytes(&encoder.into_inner())
}

/// All hashes a leaf append introduces, in append order: the leaf hash
/// followed by every newly-completed ancestor up the right spine.
///
/// `get_hash` only ever sees positions that existed before this append.
pub fn spine_hashes(
    leaf: &Leaf,
    get_hash: impl Fn(Index) -> Result<Hash256, MmrError>,
) -> Result<Vec<Hash256>, MmrError> {
    let mut hashes = vec![*leaf.hash()];

    let mut right_hash = *leaf.hash();
    let mut next_idx = leaf.node_index().next();
    while !next_idx.is_leaf() {
        let left_hash = get_hash(next_idx.left_child())?;
        let node_hash = parent_hash(next_idx.position(), &left_hash, &right_hash);

        hashes.push(node_hash);
        right_hash = node_hash;
        next_idx = next_idx.next();
    }

    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::LeafIndex;

    #[test]
    fn parent_hash_depends_on_position() {
        let left = [1u8; 32];
        let right = [2u8; 32];
        assert_ne!(parent_hash(2, &left, &right), parent_hash(5, &left, &right));
        assert_ne!(parent_hash(2, &left, &right), parent_hash(2, &right, &left));
    }

    #[test]
    fn first_leaf_builds_no_ancestors() {
        let leaf = Leaf::create(LeafIndex::at(0), vec![0xaa]);
        let hashes = spine_hashes(&leaf, |_| panic!("no lookup expected")).unwrap();
        assert_eq!(hashes, vec![*leaf.hash()]);
    }

    #[test]
    fn second_leaf_completes_one_parent() {
        let leaf0 = Leaf::create(LeafIndex::at(0), vec![0]);
        let leaf1 = Leaf::create(LeafIndex::at(1), vec![1]);

        let hashes = spine_hashes(&leaf1, |idx| {
            assert_eq!(idx.position(), 0);
            Ok(*leaf0.hash())
        })
        .unwrap();

        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0], *leaf1.hash());
        assert_eq!(hashes[1], parent_hash(2, leaf0.hash(), leaf1.hash()));
    }
}
