//! Transaction kernels and the peg-in/peg-out coin models.

use std::cmp::Ordering;

use mweb_consensus::{Amount, Hash256};
use mweb_crypto::{
    BlindingFactor, Commitment, Crypto, CryptoError, Signature, COMMITMENT_SIZE, SIGNATURE_SIZE,
};

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::hashed;

/// Coins moving from the base chain into the extension block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PegInCoin {
    pub amount: Amount,
    pub commitment: Commitment,
}

impl PegInCoin {
    pub fn new(amount: Amount, commitment: Commitment) -> Self {
        Self { amount, commitment }
    }
}

impl Encodable for PegInCoin {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u64_be(self.amount as u64);
        encoder.write_bytes(self.commitment.as_bytes());
    }
}

impl Decodable for PegInCoin {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let amount = decoder.read_u64_be()? as Amount;
        let commitment = Commitment::from_bytes(decoder.read_fixed::<COMMITMENT_SIZE>()?);
        Ok(Self { amount, commitment })
    }
}

/// Coins moving from the extension block back to the base chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PegOutCoin {
    pub amount: Amount,
    pub script_pubkey: Vec<u8>,
}

impl PegOutCoin {
    pub fn new(amount: Amount, script_pubkey: Vec<u8>) -> Self {
        Self {
            amount,
            script_pubkey,
        }
    }
}

impl Encodable for PegOutCoin {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u64_be(self.amount as u64);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for PegOutCoin {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let amount = decoder.read_u64_be()? as Amount;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            amount,
            script_pubkey,
        })
    }
}

pub const FEE_FEATURE_BIT: u8 = 0x01;
pub const PEGIN_FEATURE_BIT: u8 = 0x02;
pub const PEGOUT_FEATURE_BIT: u8 = 0x04;
pub const HEIGHT_LOCK_FEATURE_BIT: u8 = 0x08;
pub const EXTRA_DATA_FEATURE_BIT: u8 = 0x10;
pub const ALL_FEATURE_BITS: u8 = FEE_FEATURE_BIT
    | PEGIN_FEATURE_BIT
    | PEGOUT_FEATURE_BIT
    | HEIGHT_LOCK_FEATURE_BIT
    | EXTRA_DATA_FEATURE_BIT;

/// A transaction kernel: the excess commitment proving the transaction
/// balances, the signature over the kernel message, and the explicit
/// supply-changing fields.
#[derive(Clone, Debug)]
pub struct Kernel {
    features: u8,
    fee: Option<Amount>,
    pegin: Option<Amount>,
    pegout: Option<PegOutCoin>,
    lock_height: Option<u64>,
    extra_data: Vec<u8>,
    excess: Commitment,
    signature: Signature,
    hash: Hash256,
}

impl Kernel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fee: Option<Amount>,
        pegin: Option<Amount>,
        pegout: Option<PegOutCoin>,
        lock_height: Option<u64>,
        extra_data: Vec<u8>,
        excess: Commitment,
        signature: Signature,
    ) -> Self {
        let features = (if fee.is_some() { FEE_FEATURE_BIT } else { 0 })
            | (if pegin.is_some() { PEGIN_FEATURE_BIT } else { 0 })
            | (if pegout.is_some() { PEGOUT_FEATURE_BIT } else { 0 })
            | (if lock_height.is_some() {
                HEIGHT_LOCK_FEATURE_BIT
            } else {
                0
            })
            | (if extra_data.is_empty() {
                0
            } else {
                EXTRA_DATA_FEATURE_BIT
            });

        let mut kernel = Self {
            features,
            fee,
            pegin,
            pegout,
            lock_height,
            extra_data,
            excess,
            signature,
            hash: [0u8; 32],
        };
        kernel.hash = hashed(&kernel);
        kernel
    }

    /// Build a kernel from its blinding factor: commits to zero with the
    /// blind and signs the kernel message with it.
    pub fn create(
        crypto: &dyn Crypto,
        blind: &BlindingFactor,
        fee: Option<Amount>,
        pegin: Option<Amount>,
        pegout: Option<PegOutCoin>,
        lock_height: Option<u64>,
    ) -> Result<Self, CryptoError> {
        let excess = crypto.commit_blinded(0, blind)?;
        let message =
            Self::compute_signature_message(&fee, &pegin, &pegout, &lock_height, &[]);
        let signature = crypto.sign(blind, &message)?;

        Ok(Self::new(
            fee,
            pegin,
            pegout,
            lock_height,
            Vec::new(),
            excess,
            signature,
        ))
    }

    pub fn features(&self) -> u8 {
        self.features
    }

    pub fn fee(&self) -> Amount {
        self.fee.unwrap_or(0)
    }

    pub fn lock_height(&self) -> u64 {
        self.lock_height.unwrap_or(0)
    }

    pub fn excess(&self) -> &Commitment {
        &self.excess
    }

    pub fn commitment(&self) -> &Commitment {
        &self.excess
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn extra_data(&self) -> &[u8] {
        &self.extra_data
    }

    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }

    pub fn has_pegin(&self) -> bool {
        self.pegin.is_some()
    }

    pub fn has_pegout(&self) -> bool {
        self.pegout.is_some()
    }

    pub fn pegin(&self) -> Amount {
        self.pegin.unwrap_or(0)
    }

    pub fn pegout(&self) -> Option<&PegOutCoin> {
        self.pegout.as_ref()
    }

    pub fn is_standard(&self) -> bool {
        self.features < EXTRA_DATA_FEATURE_BIT
    }

    /// Net change to the extension block's supply: peg-ins add coins,
    /// fees and peg-outs remove them.
    pub fn supply_change(&self) -> Amount {
        self.pegin.unwrap_or(0)
            - self.fee.unwrap_or(0)
            - self.pegout.as_ref().map(|p| p.amount).unwrap_or(0)
    }

    /// The message the kernel signature commits to: everything except
    /// the excess and the signature itself.
    pub fn signature_message(&self) -> Hash256 {
        Self::compute_signature_message(
            &self.fee,
            &self.pegin,
            &self.pegout,
            &self.lock_height,
            &self.extra_data,
        )
    }

    fn compute_signature_message(
        fee: &Option<Amount>,
        pegin: &Option<Amount>,
        pegout: &Option<PegOutCoin>,
        lock_height: &Option<u64>,
        extra_data: &[u8],
    ) -> Hash256 {
        let features = (if fee.is_some() { FEE_FEATURE_BIT } else { 0 })
            | (if pegin.is_some() { PEGIN_FEATURE_BIT } else { 0 })
            | (if pegout.is_some() { PEGOUT_FEATURE_BIT } else { 0 })
            | (if lock_height.is_some() {
                HEIGHT_LOCK_FEATURE_BIT
            } else {
                0
            })
            | (if extra_data.is_empty() {
                0
            } else {
                EXTRA_DATA_FEATURE_BIT
            });

        let mut encoder = Encoder::new();
        encoder.write_u8(features);
        if let Some(fee) = fee {
            encoder.write_u64_be(*fee as u64);
        }
        if let Some(pegin) = pegin {
            encoder.write_u64_be(*pegin as u64);
        }
        if let Some(pegout) = pegout {
            pegout.consensus_encode(&mut encoder);
        }
        if let Some(lock_height) = lock_height {
            encoder.write_u64_be(*lock_height);
        }
        if !extra_data.is_empty() {
            encoder.write_var_bytes(extra_data);
        }

        crate::hash::hashed_bytes(&encoder.into_inner())
    }
}

impl PartialEq for Kernel {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Kernel {}

impl Encodable for Kernel {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.features);
        if let Some(fee) = self.fee {
            encoder.write_u64_be(fee as u64);
        }
        if let Some(pegin) = self.pegin {
            encoder.write_u64_be(pegin as u64);
        }
        if let Some(pegout) = &self.pegout {
            pegout.consensus_encode(encoder);
        }
        if let Some(lock_height) = self.lock_height {
            encoder.write_u64_be(lock_height);
        }
        if !self.extra_data.is_empty() {
            encoder.write_var_bytes(&self.extra_data);
        }
        encoder.write_bytes(self.excess.as_bytes());
        encoder.write_bytes(self.signature.as_bytes());
    }
}

impl Decodable for Kernel {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let features = decoder.read_u8()?;
        if features & !ALL_FEATURE_BITS != 0 {
            return Err(DecodeError::InvalidData("unknown kernel feature bits"));
        }

        let fee = if features & FEE_FEATURE_BIT != 0 {
            Some(decoder.read_u64_be()? as Amount)
        } else {
            None
        };
        let pegin = if features & PEGIN_FEATURE_BIT != 0 {
            Some(decoder.read_u64_be()? as Amount)
        } else {
            None
        };
        let pegout = if features & PEGOUT_FEATURE_BIT != 0 {
            Some(PegOutCoin::consensus_decode(decoder)?)
        } else {
            None
        };
        let lock_height = if features & HEIGHT_LOCK_FEATURE_BIT != 0 {
            Some(decoder.read_u64_be()?)
        } else {
            None
        };
        let extra_data = if features & EXTRA_DATA_FEATURE_BIT != 0 {
            let bytes = decoder.read_var_bytes()?;
            if bytes.is_empty() {
                return Err(DecodeError::InvalidData("empty kernel extra data"));
            }
            bytes
        } else {
            Vec::new()
        };
        let excess = Commitment::from_bytes(decoder.read_fixed::<COMMITMENT_SIZE>()?);
        let signature = Signature::from_bytes(decoder.read_fixed::<SIGNATURE_SIZE>()?);

        Ok(Self::new(
            fee,
            pegin,
            pegout,
            lock_height,
            extra_data,
            excess,
            signature,
        ))
    }
}

/// Canonical kernel order: net supply increase first, ties broken by hash.
pub fn kernel_order(a: &Kernel, b: &Kernel) -> Ordering {
    b.supply_change()
        .cmp(&a.supply_change())
        .then_with(|| a.hash().cmp(b.hash()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};
    use mweb_crypto::sim::SimCrypto;

    fn blind(byte: u8) -> BlindingFactor {
        let mut bytes = [0u8; 32];
        bytes[0] = byte;
        BlindingFactor(bytes)
    }

    #[test]
    fn supply_change_nets_pegs_and_fees() {
        let crypto = SimCrypto::new();
        let kernel = Kernel::create(
            &crypto,
            &blind(1),
            Some(10),
            Some(1000),
            Some(PegOutCoin::new(100, vec![0u8; 8])),
            None,
        )
        .unwrap();
        assert_eq!(kernel.supply_change(), 890);

        let plain = Kernel::create(&crypto, &blind(2), Some(5), None, None, None).unwrap();
        assert_eq!(plain.supply_change(), -5);
    }

    #[test]
    fn feature_bits_follow_fields() {
        let crypto = SimCrypto::new();
        let kernel = Kernel::create(&crypto, &blind(1), Some(1), Some(2), None, Some(99)).unwrap();
        assert_eq!(
            kernel.features(),
            FEE_FEATURE_BIT | PEGIN_FEATURE_BIT | HEIGHT_LOCK_FEATURE_BIT
        );
        assert!(kernel.is_standard());
        assert_eq!(kernel.lock_height(), 99);
    }

    #[test]
    fn serialization_roundtrip_preserves_hash() {
        let crypto = SimCrypto::new();
        let kernel = Kernel::create(
            &crypto,
            &blind(7),
            Some(25),
            None,
            Some(PegOutCoin::new(40, vec![1, 2, 3, 4, 5])),
            Some(12),
        )
        .unwrap();

        let decoded: Kernel = decode(&encode(&kernel)).unwrap();
        assert_eq!(decoded, kernel);
        assert_eq!(decoded.hash(), kernel.hash());
        assert_eq!(decoded.supply_change(), kernel.supply_change());
    }

    #[test]
    fn unknown_feature_bits_rejected() {
        let bytes = vec![0x20u8];
        assert!(matches!(
            decode::<Kernel>(&bytes),
            Err(DecodeError::InvalidData(_))
        ));
    }

    #[test]
    fn kernel_signature_verifies() {
        let crypto = SimCrypto::new();
        let kernel = Kernel::create(&crypto, &blind(3), Some(10), None, None, None).unwrap();
        let public_key = crypto.to_public_key(kernel.excess()).unwrap();
        assert!(crypto.verify(&mweb_crypto::SignedMessage::new(
            kernel.signature_message(),
            public_key,
            *kernel.signature(),
        )));
    }

    #[test]
    fn ordering_by_supply_change_then_hash() {
        let crypto = SimCrypto::new();
        let high = Kernel::create(&crypto, &blind(1), None, Some(100), None, None).unwrap();
        let low = Kernel::create(&crypto, &blind(2), Some(10), None, None, None).unwrap();

        assert_eq!(kernel_order(&high, &low), Ordering::Less);
        assert_eq!(kernel_order(&low, &high), Ordering::Greater);
        assert_eq!(kernel_order(&high, &high), Ordering::Equal);
    }
}
