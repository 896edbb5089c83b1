//! Consensus parameters. Any change to these is a hard fork.

/// Maximum total weight of an extension block (network rule).
pub const MAX_BLOCK_WEIGHT: usize = 21_000;

/// Maximum size of a kernel's extra data field, in bytes (network rule).
pub const MAX_KERNEL_EXTRADATA_SIZE: usize = 100;

/// A pegged-in output may only be spent this many blocks after it
/// was created (network rule).
pub const PEGIN_MATURITY: u64 = 20;

/// Minimum serialized size of a peg-out scriptPubKey, in bytes.
pub const MIN_PEGOUT_SCRIPT_SIZE: usize = 4;

/// Maximum serialized size of a peg-out scriptPubKey, in bytes.
pub const MAX_PEGOUT_SCRIPT_SIZE: usize = 42;
