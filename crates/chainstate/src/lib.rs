//! The layered UTXO views, block apply/undo machinery, and the
//! consensus validation engine for the extension block.

use std::fmt;

pub mod aggregation;
pub mod builder;
pub mod cache;
pub mod chain;
pub mod db;
pub mod factory;
pub mod mmr_info;
pub mod node;
pub mod undo;
pub mod utxo;
pub mod validation;
pub mod view;

pub use builder::BlockBuilder;
pub use cache::CacheView;
pub use db::DbView;
pub use mmr_info::MmrInfo;
pub use node::Node;
pub use undo::BlockUndo;
pub use utxo::Utxo;
pub use view::{CoinAction, CoinsViewUpdates, SharedView, View};

use mweb_consensus::ConsensusError;
use mweb_crypto::CryptoError;
use mweb_mmr::MmrError;
use mweb_primitives::encoding::DecodeError;
use mweb_storage::StoreError;

#[derive(Debug)]
pub enum ChainStateError {
    Consensus(ConsensusError),
    Crypto(CryptoError),
    Mmr(MmrError),
    Store(StoreError),
    Decode(DecodeError),
    /// An internal invariant does not hold (corrupt state).
    InvalidState(&'static str),
}

impl fmt::Display for ChainStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStateError::Consensus(err) => write!(f, "consensus error: {err}"),
            ChainStateError::Crypto(err) => write!(f, "crypto error: {err}"),
            ChainStateError::Mmr(err) => write!(f, "mmr error: {err}"),
            ChainStateError::Store(err) => write!(f, "store error: {err}"),
            ChainStateError::Decode(err) => write!(f, "decode error: {err}"),
            ChainStateError::InvalidState(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ChainStateError {}

impl From<ConsensusError> for ChainStateError {
    fn from(err: ConsensusError) -> Self {
        ChainStateError::Consensus(err)
    }
}

impl From<CryptoError> for ChainStateError {
    fn from(err: CryptoError) -> Self {
        ChainStateError::Crypto(err)
    }
}

impl From<MmrError> for ChainStateError {
    fn from(err: MmrError) -> Self {
        ChainStateError::Mmr(err)
    }
}

impl From<StoreError> for ChainStateError {
    fn from(err: StoreError) -> Self {
        ChainStateError::Store(err)
    }
}

impl From<DecodeError> for ChainStateError {
    fn from(err: DecodeError) -> Self {
        ChainStateError::Decode(err)
    }
}

impl ChainStateError {
    /// The consensus error inside, if this is a consensus failure.
    pub fn consensus(&self) -> Option<ConsensusError> {
        match self {
            ChainStateError::Consensus(err) => Some(*err),
            _ => None,
        }
    }
}
