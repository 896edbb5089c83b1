//! Core model types and consensus serialization for the extension block.

pub mod block;
pub mod encoding;
pub mod hash;
pub mod kernel;
pub mod transaction;

pub use block::{Block, Header};
pub use encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
pub use hash::{hashed, hashed_bytes, sha256, sha256d, to_hex};
pub use kernel::{kernel_order, Kernel, PegInCoin, PegOutCoin};
pub use transaction::{
    owner_sig_hash, Input, Output, OutputId, OutputMessage, Transaction, TxBody,
    OUTPUT_FEATURE_PEGGED_IN,
};
