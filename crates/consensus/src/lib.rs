//! Consensus constants, weight rules, and the consensus error taxonomy.

pub mod error;
pub mod params;
pub mod weight;

pub use error::ConsensusError;
pub use params::{MAX_BLOCK_WEIGHT, MAX_KERNEL_EXTRADATA_SIZE, PEGIN_MATURITY};

/// Raw 32-byte hash value used throughout the consensus code.
pub type Hash256 = [u8; 32];

/// Monetary amount in base units. Signed so supply deltas can go negative.
pub type Amount = i64;
