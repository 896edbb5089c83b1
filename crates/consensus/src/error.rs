//! Consensus error taxonomy.
//!
//! Every variant is fatal to the operation that raised it and is never
//! silently recovered; the top-level entry points convert them into
//! boolean failures after logging.

use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConsensusError {
    /// The block's header hash does not match the expected hash.
    HashMismatch,
    /// Duplicate input, output, kernel, or owner-signature entries.
    DuplicateCommits,
    /// Block or transaction exceeds the maximum weight.
    BlockWeight,
    /// The Pedersen commitment balance equation does not hold.
    BlockSums,
    /// The owner public key balance equation does not hold.
    OwnerSums,
    /// A kernel, input, output, or owner signature failed verification.
    InvalidSig,
    /// An output range proof failed verification.
    RangeProof,
    /// Block peg-ins do not match the externally supplied set.
    PeginMismatch,
    /// Block peg-outs do not match the externally supplied set.
    PegoutMismatch,
    /// MMR roots or sizes do not match the header.
    MmrMismatch,
    /// An input references a coin that is not in the unspent set.
    UtxoMissing,
    /// A pegged-in output was spent before it matured.
    PeginMaturity,
    /// An owner signature references a kernel that is not in the body.
    KernelMissing,
    /// Inputs, outputs, kernels, or owner signatures are out of order.
    NotSorted,
}

impl ConsensusError {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsensusError::HashMismatch => "HASH_MISMATCH",
            ConsensusError::DuplicateCommits => "DUPLICATE_COMMITS",
            ConsensusError::BlockWeight => "BLOCK_WEIGHT",
            ConsensusError::BlockSums => "BLOCK_SUMS",
            ConsensusError::OwnerSums => "OWNER_SUMS",
            ConsensusError::InvalidSig => "INVALID_SIG",
            ConsensusError::RangeProof => "BULLETPROOF",
            ConsensusError::PeginMismatch => "PEGIN_MISMATCH",
            ConsensusError::PegoutMismatch => "PEGOUT_MISMATCH",
            ConsensusError::MmrMismatch => "MMR_MISMATCH",
            ConsensusError::UtxoMissing => "UTXO_MISSING",
            ConsensusError::PeginMaturity => "PEGIN_MATURITY",
            ConsensusError::KernelMissing => "KERNEL_MISSING",
            ConsensusError::NotSorted => "NOT_SORTED",
        }
    }
}

impl fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ConsensusError {}
