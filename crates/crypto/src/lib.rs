//! Crypto value types and the capability interface consumed by the
//! consensus code.
//!
//! Curve arithmetic itself is an injected collaborator: everything here
//! is either a fixed-size byte value or a trait method that may fail with
//! [`CryptoError`]. The context object implementing [`Crypto`] is built
//! once at process start and passed by `Arc` into every component that
//! needs it.

use std::fmt;
use std::sync::Arc;

use mweb_consensus::Hash256;

pub mod sim;

pub const COMMITMENT_SIZE: usize = 33;
pub const PUBLIC_KEY_SIZE: usize = 33;
pub const BLINDING_FACTOR_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CryptoError {
    /// A commitment or public key did not decode to a valid point.
    InvalidPoint,
    /// A blinding factor was not a valid scalar.
    InvalidScalar,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::InvalidPoint => write!(f, "invalid curve point"),
            CryptoError::InvalidScalar => write!(f, "invalid scalar"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// 33-byte compressed Pedersen commitment `v*H + r*G`.
///
/// The all-zero value is a distinguished "no commitment" sentinel.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Commitment(pub [u8; COMMITMENT_SIZE]);

impl Commitment {
    pub const ZERO: Commitment = Commitment([0u8; COMMITMENT_SIZE]);

    pub fn from_bytes(bytes: [u8; COMMITMENT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; COMMITMENT_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Default for Commitment {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// 32-byte scalar. The zero value is the additive identity.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BlindingFactor(pub [u8; BLINDING_FACTOR_SIZE]);

impl BlindingFactor {
    pub const ZERO: BlindingFactor = BlindingFactor([0u8; BLINDING_FACTOR_SIZE]);

    pub fn from_bytes(bytes: [u8; BLINDING_FACTOR_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; BLINDING_FACTOR_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Display for BlindingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// 33-byte compressed public key.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl Default for PublicKey {
    fn default() -> Self {
        Self([0u8; PUBLIC_KEY_SIZE])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// 64-byte Schnorr signature.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Signature(pub [u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; SIGNATURE_SIZE])
    }
}

/// A message hash, the public key that signed it, and the signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignedMessage {
    pub message: Hash256,
    pub public_key: PublicKey,
    pub signature: Signature,
}

impl SignedMessage {
    pub fn new(message: Hash256, public_key: PublicKey, signature: Signature) -> Self {
        Self {
            message,
            public_key,
            signature,
        }
    }
}

/// A commitment paired with the range proof bytes covering it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProofData {
    pub commitment: Commitment,
    pub proof: Vec<u8>,
    pub extra_data: Vec<u8>,
}

/// The curve-arithmetic capability consumed by the consensus engine.
///
/// Implementations must be pure: the same inputs always produce the same
/// outputs, and failures surface as [`CryptoError`] rather than panics.
pub trait Crypto: Send + Sync {
    /// Commitment to `value` with a zero blinding factor.
    fn commit_transparent(&self, value: u64) -> Result<Commitment, CryptoError>;

    /// Commitment to `value` with blinding factor `blind`.
    fn commit_blinded(&self, value: u64, blind: &BlindingFactor)
        -> Result<Commitment, CryptoError>;

    /// Sum of `positive` commitments minus the sum of `negative` ones.
    fn add_commitments(
        &self,
        positive: &[Commitment],
        negative: &[Commitment],
    ) -> Result<Commitment, CryptoError>;

    /// Sum of `positive` blinding factors minus the sum of `negative` ones.
    fn add_blinding_factors(
        &self,
        positive: &[BlindingFactor],
        negative: &[BlindingFactor],
    ) -> Result<BlindingFactor, CryptoError>;

    /// Reinterpret a commitment as the public key it resolves to.
    fn to_public_key(&self, commitment: &Commitment) -> Result<PublicKey, CryptoError>;

    /// Sum of public keys.
    fn add_public_keys(&self, keys: &[PublicKey]) -> Result<PublicKey, CryptoError>;

    /// The public key of a secret scalar (`blind * G`).
    fn public_key_of(&self, blind: &BlindingFactor) -> Result<PublicKey, CryptoError>;

    /// Sign `message` with the secret scalar `key`.
    fn sign(&self, key: &BlindingFactor, message: &Hash256) -> Result<Signature, CryptoError>;

    /// Verify a single signature.
    fn verify(&self, signed: &SignedMessage) -> bool;

    /// Verify a batch of signatures; false if any fails.
    fn batch_verify(&self, signatures: &[SignedMessage]) -> bool;

    /// Generate a range proof for a committed value.
    fn prove_range(
        &self,
        value: u64,
        blind: &BlindingFactor,
        extra_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Verify a batch of range proofs; false if any fails.
    fn verify_range_proofs(&self, proofs: &[ProofData]) -> bool;
}

/// Shared handle to the process-wide crypto context.
pub type CryptoCtx = Arc<dyn Crypto>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sentinels() {
        assert!(Commitment::ZERO.is_zero());
        assert!(BlindingFactor::ZERO.is_zero());
        assert!(!Commitment([1u8; COMMITMENT_SIZE]).is_zero());
    }

    #[test]
    fn commitment_ordering_is_bytewise() {
        let mut a = [0u8; COMMITMENT_SIZE];
        let mut b = [0u8; COMMITMENT_SIZE];
        a[0] = 1;
        b[0] = 2;
        assert!(Commitment(a) < Commitment(b));
    }

    #[test]
    fn display_is_lower_hex() {
        let mut bytes = [0u8; BLINDING_FACTOR_SIZE];
        bytes[0] = 0xab;
        bytes[31] = 0x01;
        let hex = BlindingFactor(bytes).to_string();
        assert!(hex.starts_with("ab00"));
        assert!(hex.ends_with("01"));
        assert_eq!(hex.len(), 64);
    }
}
