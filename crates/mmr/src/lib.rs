//! Merkle Mountain Range engine: index arithmetic, backends, caches,
//! the leaf-liveness bitset, pruning, and compaction.

use std::fmt;

pub mod backend;
pub mod bitset;
pub mod factory;
pub mod hash_file;
pub mod index;
pub mod leaf;
pub mod leafset;
pub mod mmr;
pub mod node;
pub mod prunelist;
pub mod util;

pub use backend::{Backend, FileBackend, VectorBackend};
pub use bitset::BitSet;
pub use index::{Index, LeafIndex};
pub use leaf::Leaf;
pub use leafset::{LeafSet, LeafSetCache, LeafSetOps, SharedLeafSet};
pub use mmr::{Mmr, MmrCache, MmrOps, SharedMmr};
pub use prunelist::PruneList;

#[derive(Debug)]
pub enum MmrError {
    /// Leaf or node is beyond the end of the MMR or has been pruned.
    NotFound,
    Io(std::io::Error),
    Store(mweb_storage::StoreError),
    Corrupt(&'static str),
}

impl fmt::Display for MmrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmrError::NotFound => write!(f, "leaf or node not found"),
            MmrError::Io(err) => write!(f, "mmr file error: {err}"),
            MmrError::Store(err) => write!(f, "mmr store error: {err}"),
            MmrError::Corrupt(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for MmrError {}

impl From<std::io::Error> for MmrError {
    fn from(err: std::io::Error) -> Self {
        MmrError::Io(err)
    }
}

impl From<mweb_storage::StoreError> for MmrError {
    fn from(err: mweb_storage::StoreError) -> Self {
        MmrError::Store(err)
    }
}
