//! Deterministic arithmetic backend.
//!
//! Models the commitment group as a pair of 128-bit integers (value
//! component, blind component) with wrapping addition, and signatures as
//! keyed hashes. Homomorphic identities hold exactly, so every consensus
//! balance check behaves as it would over the real curve. Not binding and
//! not hiding; suitable for tests and simulation only.

use sha2::{Digest, Sha256};

use mweb_consensus::Hash256;

use crate::{
    BlindingFactor, Commitment, Crypto, CryptoError, ProofData, PublicKey, SignedMessage,
    Signature, BLINDING_FACTOR_SIZE, COMMITMENT_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};

const COMMIT_TAG: u8 = 0x09;
const PUBKEY_TAG: u8 = 0x02;
const SIG_DOMAIN: &[u8] = b"mweb.sim.schnorr";
const RANGE_DOMAIN: &[u8] = b"mweb.sim.rangeproof";

#[derive(Debug, Default)]
pub struct SimCrypto;

impl SimCrypto {
    pub fn new() -> Self {
        Self
    }
}

fn scalar_of(blind: &BlindingFactor) -> Result<i128, CryptoError> {
    let bytes = blind.as_bytes();
    if bytes[16..].iter().any(|b| *b != 0) {
        return Err(CryptoError::InvalidScalar);
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&bytes[..16]);
    Ok(i128::from_le_bytes(low))
}

fn blind_of(scalar: i128) -> BlindingFactor {
    let mut bytes = [0u8; BLINDING_FACTOR_SIZE];
    bytes[..16].copy_from_slice(&scalar.to_le_bytes());
    BlindingFactor(bytes)
}

fn encode_commitment(value: i128, blind: i128) -> Commitment {
    if value == 0 && blind == 0 {
        return Commitment::ZERO;
    }
    let mut bytes = [0u8; COMMITMENT_SIZE];
    bytes[0] = COMMIT_TAG;
    bytes[1..17].copy_from_slice(&value.to_le_bytes());
    bytes[17..].copy_from_slice(&blind.to_le_bytes());
    Commitment(bytes)
}

fn decode_commitment(commitment: &Commitment) -> Result<(i128, i128), CryptoError> {
    let bytes = commitment.as_bytes();
    if commitment.is_zero() {
        return Ok((0, 0));
    }
    if bytes[0] != COMMIT_TAG {
        return Err(CryptoError::InvalidPoint);
    }
    let mut value = [0u8; 16];
    let mut blind = [0u8; 16];
    value.copy_from_slice(&bytes[1..17]);
    blind.copy_from_slice(&bytes[17..]);
    Ok((i128::from_le_bytes(value), i128::from_le_bytes(blind)))
}

fn encode_public_key(scalar: i128) -> PublicKey {
    if scalar == 0 {
        return PublicKey::default();
    }
    let mut bytes = [0u8; PUBLIC_KEY_SIZE];
    bytes[0] = PUBKEY_TAG;
    bytes[1..17].copy_from_slice(&scalar.to_le_bytes());
    PublicKey(bytes)
}

fn decode_public_key(key: &PublicKey) -> Result<i128, CryptoError> {
    let bytes = key.as_bytes();
    if bytes.iter().all(|b| *b == 0) {
        return Ok(0);
    }
    if bytes[0] != PUBKEY_TAG || bytes[17..].iter().any(|b| *b != 0) {
        return Err(CryptoError::InvalidPoint);
    }
    let mut scalar = [0u8; 16];
    scalar.copy_from_slice(&bytes[1..17]);
    Ok(i128::from_le_bytes(scalar))
}

fn signature_for(public_key: &PublicKey, message: &Hash256) -> Signature {
    let mut hasher = Sha256::new();
    hasher.update(SIG_DOMAIN);
    hasher.update(public_key.as_bytes());
    hasher.update(message);
    let first: [u8; 32] = hasher.finalize().into();
    let second: [u8; 32] = Sha256::digest(first).into();

    let mut bytes = [0u8; SIGNATURE_SIZE];
    bytes[..32].copy_from_slice(&first);
    bytes[32..].copy_from_slice(&second);
    Signature(bytes)
}

fn range_proof_for(commitment: &Commitment, extra_data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(RANGE_DOMAIN);
    hasher.update(commitment.as_bytes());
    hasher.update(extra_data);
    hasher.finalize().to_vec()
}

impl Crypto for SimCrypto {
    fn commit_transparent(&self, value: u64) -> Result<Commitment, CryptoError> {
        Ok(encode_commitment(value as i128, 0))
    }

    fn commit_blinded(
        &self,
        value: u64,
        blind: &BlindingFactor,
    ) -> Result<Commitment, CryptoError> {
        Ok(encode_commitment(value as i128, scalar_of(blind)?))
    }

    fn add_commitments(
        &self,
        positive: &[Commitment],
        negative: &[Commitment],
    ) -> Result<Commitment, CryptoError> {
        let mut value: i128 = 0;
        let mut blind: i128 = 0;
        for commitment in positive {
            let (v, b) = decode_commitment(commitment)?;
            value = value.wrapping_add(v);
            blind = blind.wrapping_add(b);
        }
        for commitment in negative {
            let (v, b) = decode_commitment(commitment)?;
            value = value.wrapping_sub(v);
            blind = blind.wrapping_sub(b);
        }
        Ok(encode_commitment(value, blind))
    }

    fn add_blinding_factors(
        &self,
        positive: &[BlindingFactor],
        negative: &[BlindingFactor],
    ) -> Result<BlindingFactor, CryptoError> {
        let mut total: i128 = 0;
        for blind in positive {
            total = total.wrapping_add(scalar_of(blind)?);
        }
        for blind in negative {
            total = total.wrapping_sub(scalar_of(blind)?);
        }
        Ok(blind_of(total))
    }

    fn to_public_key(&self, commitment: &Commitment) -> Result<PublicKey, CryptoError> {
        let (value, blind) = decode_commitment(commitment)?;
        if value != 0 {
            return Err(CryptoError::InvalidPoint);
        }
        Ok(encode_public_key(blind))
    }

    fn add_public_keys(&self, keys: &[PublicKey]) -> Result<PublicKey, CryptoError> {
        let mut total: i128 = 0;
        for key in keys {
            total = total.wrapping_add(decode_public_key(key)?);
        }
        Ok(encode_public_key(total))
    }

    fn public_key_of(&self, blind: &BlindingFactor) -> Result<PublicKey, CryptoError> {
        Ok(encode_public_key(scalar_of(blind)?))
    }

    fn sign(&self, key: &BlindingFactor, message: &Hash256) -> Result<Signature, CryptoError> {
        let public_key = self.public_key_of(key)?;
        Ok(signature_for(&public_key, message))
    }

    fn verify(&self, signed: &SignedMessage) -> bool {
        signature_for(&signed.public_key, &signed.message) == signed.signature
    }

    fn batch_verify(&self, signatures: &[SignedMessage]) -> bool {
        signatures.iter().all(|signed| self.verify(signed))
    }

    fn prove_range(
        &self,
        value: u64,
        blind: &BlindingFactor,
        extra_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let commitment = self.commit_blinded(value, blind)?;
        Ok(range_proof_for(&commitment, extra_data))
    }

    fn verify_range_proofs(&self, proofs: &[ProofData]) -> bool {
        proofs
            .iter()
            .all(|proof| range_proof_for(&proof.commitment, &proof.extra_data) == proof.proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blind(scalar: i128) -> BlindingFactor {
        blind_of(scalar)
    }

    #[test]
    fn commitments_are_homomorphic() {
        let crypto = SimCrypto::new();

        let a = crypto.commit_blinded(100, &blind(7)).unwrap();
        let b = crypto.commit_blinded(50, &blind(3)).unwrap();
        let sum = crypto.add_commitments(&[a, b], &[]).unwrap();
        let direct = crypto.commit_blinded(150, &blind(10)).unwrap();
        assert_eq!(sum, direct);

        let diff = crypto.add_commitments(&[sum], &[b]).unwrap();
        assert_eq!(diff, a);
    }

    #[test]
    fn zero_commitment_is_identity() {
        let crypto = SimCrypto::new();
        let zero = crypto.commit_blinded(0, &BlindingFactor::ZERO).unwrap();
        assert!(zero.is_zero());

        let a = crypto.commit_blinded(42, &blind(5)).unwrap();
        assert_eq!(crypto.add_commitments(&[a, zero], &[]).unwrap(), a);
    }

    #[test]
    fn blinding_factor_sums() {
        let crypto = SimCrypto::new();
        let sum = crypto
            .add_blinding_factors(&[blind(10), blind(5)], &[blind(3)])
            .unwrap();
        assert_eq!(sum, blind(12));

        let negative = crypto
            .add_blinding_factors(&[blind(1)], &[blind(2)])
            .unwrap();
        let restored = crypto
            .add_blinding_factors(&[negative, blind(2)], &[])
            .unwrap();
        assert_eq!(restored, blind(1));
    }

    #[test]
    fn excess_commitment_resolves_to_public_key() {
        let crypto = SimCrypto::new();
        let excess = crypto.commit_blinded(0, &blind(99)).unwrap();
        let from_commit = crypto.to_public_key(&excess).unwrap();
        let from_blind = crypto.public_key_of(&blind(99)).unwrap();
        assert_eq!(from_commit, from_blind);

        let value_bearing = crypto.commit_blinded(1, &blind(99)).unwrap();
        assert_eq!(
            crypto.to_public_key(&value_bearing),
            Err(CryptoError::InvalidPoint)
        );
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let crypto = SimCrypto::new();
        let message = [0x5au8; 32];
        let signature = crypto.sign(&blind(77), &message).unwrap();
        let public_key = crypto.public_key_of(&blind(77)).unwrap();

        assert!(crypto.verify(&SignedMessage::new(message, public_key, signature)));

        let mut wrong = message;
        wrong[0] ^= 1;
        assert!(!crypto.verify(&SignedMessage::new(wrong, public_key, signature)));
    }

    #[test]
    fn range_proof_roundtrip() {
        let crypto = SimCrypto::new();
        let commitment = crypto.commit_blinded(1000, &blind(4)).unwrap();
        let proof = crypto.prove_range(1000, &blind(4), &[]).unwrap();

        assert!(crypto.verify_range_proofs(&[ProofData {
            commitment,
            proof: proof.clone(),
            extra_data: Vec::new(),
        }]));

        let other = crypto.commit_blinded(1001, &blind(4)).unwrap();
        assert!(!crypto.verify_range_proofs(&[ProofData {
            commitment: other,
            proof,
            extra_data: Vec::new(),
        }]));
    }

    #[test]
    fn wide_scalars_are_rejected() {
        let crypto = SimCrypto::new();
        let mut bytes = [0u8; BLINDING_FACTOR_SIZE];
        bytes[20] = 1;
        let invalid = BlindingFactor(bytes);
        assert_eq!(
            crypto.add_blinding_factors(&[invalid], &[]),
            Err(CryptoError::InvalidScalar)
        );
    }
}
