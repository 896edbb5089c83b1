//! Extension block headers and blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mweb_consensus::{Amount, Hash256};
use mweb_crypto::BlindingFactor;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::hashed;
use crate::kernel::{Kernel, PegInCoin, PegOutCoin};
use crate::transaction::{Input, Output, TxBody};

/// Identifies one state snapshot of the extension block.
///
/// Wire layout is fixed big-endian:
/// `height:u64, outputRoot:32B, kernelRoot:32B, leafsetRoot:32B,
///  kernelOffset:32B, ownerOffset:32B, outputMMRSize:u64, kernelMMRSize:u64`.
#[derive(Clone, Debug)]
pub struct Header {
    height: u64,
    output_root: Hash256,
    kernel_root: Hash256,
    leafset_root: Hash256,
    kernel_offset: BlindingFactor,
    owner_offset: BlindingFactor,
    output_mmr_size: u64,
    kernel_mmr_size: u64,
    hash: Hash256,
}

impl Header {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        height: u64,
        output_root: Hash256,
        kernel_root: Hash256,
        leafset_root: Hash256,
        kernel_offset: BlindingFactor,
        owner_offset: BlindingFactor,
        output_mmr_size: u64,
        kernel_mmr_size: u64,
    ) -> Self {
        let mut header = Self {
            height,
            output_root,
            kernel_root,
            leafset_root,
            kernel_offset,
            owner_offset,
            output_mmr_size,
            kernel_mmr_size,
            hash: [0u8; 32],
        };
        header.hash = hashed(&header);
        header
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn output_root(&self) -> &Hash256 {
        &self.output_root
    }

    pub fn kernel_root(&self) -> &Hash256 {
        &self.kernel_root
    }

    pub fn leafset_root(&self) -> &Hash256 {
        &self.leafset_root
    }

    pub fn kernel_offset(&self) -> &BlindingFactor {
        &self.kernel_offset
    }

    pub fn owner_offset(&self) -> &BlindingFactor {
        &self.owner_offset
    }

    /// Number of leaves in the output MMR, spent or not.
    pub fn num_txos(&self) -> u64 {
        self.output_mmr_size
    }

    /// Number of leaves in the kernel MMR.
    pub fn num_kernels(&self) -> u64 {
        self.kernel_mmr_size
    }

    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }
}

impl PartialEq for Header {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Header {}

impl Encodable for Header {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u64_be(self.height);
        encoder.write_bytes(&self.output_root);
        encoder.write_bytes(&self.kernel_root);
        encoder.write_bytes(&self.leafset_root);
        encoder.write_bytes(self.kernel_offset.as_bytes());
        encoder.write_bytes(self.owner_offset.as_bytes());
        encoder.write_u64_be(self.output_mmr_size);
        encoder.write_u64_be(self.kernel_mmr_size);
    }
}

impl Decodable for Header {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let height = decoder.read_u64_be()?;
        let output_root = decoder.read_fixed::<32>()?;
        let kernel_root = decoder.read_fixed::<32>()?;
        let leafset_root = decoder.read_fixed::<32>()?;
        let kernel_offset = BlindingFactor::from_bytes(decoder.read_fixed::<32>()?);
        let owner_offset = BlindingFactor::from_bytes(decoder.read_fixed::<32>()?);
        let output_mmr_size = decoder.read_u64_be()?;
        let kernel_mmr_size = decoder.read_u64_be()?;
        Ok(Self::new(
            height,
            output_root,
            kernel_root,
            leafset_root,
            kernel_offset,
            owner_offset,
            output_mmr_size,
            kernel_mmr_size,
        ))
    }
}

/// An extension block: a header plus the transaction body it commits to.
#[derive(Debug)]
pub struct Block {
    header: Arc<Header>,
    body: TxBody,
    validated: AtomicBool,
}

impl Block {
    pub fn new(header: Arc<Header>, body: TxBody) -> Self {
        Self {
            header,
            body,
            validated: AtomicBool::new(false),
        }
    }

    pub fn header(&self) -> &Arc<Header> {
        &self.header
    }

    pub fn body(&self) -> &TxBody {
        &self.body
    }

    pub fn height(&self) -> u64 {
        self.header.height()
    }

    pub fn hash(&self) -> &Hash256 {
        self.header.hash()
    }

    pub fn kernel_offset(&self) -> &BlindingFactor {
        self.header.kernel_offset()
    }

    pub fn inputs(&self) -> &[Input] {
        self.body.inputs()
    }

    pub fn outputs(&self) -> &[Output] {
        self.body.outputs()
    }

    pub fn kernels(&self) -> &[Kernel] {
        self.body.kernels()
    }

    pub fn pegins(&self) -> Vec<PegInCoin> {
        self.body.pegins()
    }

    pub fn pegouts(&self) -> Vec<PegOutCoin> {
        self.body.pegouts()
    }

    pub fn total_fee(&self) -> Amount {
        self.body.total_fee()
    }

    pub fn supply_change(&self) -> Amount {
        self.body.supply_change()
    }

    pub fn was_validated(&self) -> bool {
        self.validated.load(Ordering::Acquire)
    }

    pub fn mark_as_validated(&self) {
        self.validated.store(true, Ordering::Release);
    }
}

impl Clone for Block {
    fn clone(&self) -> Self {
        Self {
            header: Arc::clone(&self.header),
            body: self.body.clone(),
            validated: AtomicBool::new(self.was_validated()),
        }
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.body == other.body
    }
}

impl Eq for Block {}

impl Encodable for Block {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.header.consensus_encode(encoder);
        self.body.consensus_encode(encoder);
    }
}

impl Decodable for Block {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let header = Arc::new(Header::consensus_decode(decoder)?);
        let body = TxBody::consensus_decode(decoder)?;
        Ok(Self::new(header, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};

    fn sample_header() -> Header {
        Header::new(
            150,
            [1u8; 32],
            [2u8; 32],
            [3u8; 32],
            BlindingFactor([4u8; 32]),
            BlindingFactor::ZERO,
            7,
            3,
        )
    }

    #[test]
    fn header_serialization_layout() {
        let header = sample_header();
        let bytes = encode(&header);
        // 8 + 32*5 + 8 + 8
        assert_eq!(bytes.len(), 184);
        assert_eq!(&bytes[..8], &150u64.to_be_bytes());
        assert_eq!(&bytes[8..40], &[1u8; 32]);
        assert_eq!(&bytes[168..176], &7u64.to_be_bytes());
        assert_eq!(&bytes[176..184], &3u64.to_be_bytes());
    }

    #[test]
    fn header_roundtrip_preserves_hash() {
        let header = sample_header();
        let decoded: Header = decode(&encode(&header)).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.hash(), header.hash());
    }

    #[test]
    fn block_validation_flag() {
        let block = Block::new(Arc::new(sample_header()), TxBody::default());
        assert!(!block.was_validated());
        block.mark_as_validated();
        assert!(block.was_validated());

        // Cloning carries the flag value.
        assert!(block.clone().was_validated());
    }

    #[test]
    fn block_roundtrip_resets_nothing() {
        let block = Block::new(Arc::new(sample_header()), TxBody::default());
        let decoded: Block = decode(&encode(&block)).unwrap();
        assert_eq!(decoded, block);
        assert!(!decoded.was_validated());
    }
}
