//! Undo data for disconnecting a block.

use std::sync::Arc;

use mweb_crypto::{Commitment, COMMITMENT_SIZE};
use mweb_primitives::block::Header;
use mweb_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};

use crate::utxo::Utxo;

/// Everything needed to restore the state preceding a block: the
/// previous header (none when undoing the first block), the full UTXOs
/// the block spent, and the commitments it added.
#[derive(Clone, Debug)]
pub struct BlockUndo {
    prev_header: Option<Arc<Header>>,
    coins_spent: Vec<Utxo>,
    coins_added: Vec<Commitment>,
}

impl BlockUndo {
    pub fn new(
        prev_header: Option<Arc<Header>>,
        coins_spent: Vec<Utxo>,
        coins_added: Vec<Commitment>,
    ) -> Self {
        Self {
            prev_header,
            coins_spent,
            coins_added,
        }
    }

    pub fn prev_header(&self) -> Option<&Arc<Header>> {
        self.prev_header.as_ref()
    }

    pub fn coins_spent(&self) -> &[Utxo] {
        &self.coins_spent
    }

    pub fn coins_added(&self) -> &[Commitment] {
        &self.coins_added
    }
}

impl Encodable for BlockUndo {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        match &self.prev_header {
            Some(header) => {
                encoder.write_u8(1);
                header.consensus_encode(encoder);
            }
            None => encoder.write_u8(0),
        }
        encoder.write_varint(self.coins_spent.len() as u64);
        for utxo in &self.coins_spent {
            utxo.consensus_encode(encoder);
        }
        encoder.write_varint(self.coins_added.len() as u64);
        for commitment in &self.coins_added {
            encoder.write_bytes(commitment.as_bytes());
        }
    }
}

impl Decodable for BlockUndo {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prev_header = match decoder.read_u8()? {
            0 => None,
            1 => Some(Arc::new(Header::consensus_decode(decoder)?)),
            _ => return Err(DecodeError::InvalidData("invalid undo header marker")),
        };

        let spent_len = decoder.read_varint()?;
        let mut coins_spent = Vec::with_capacity(spent_len.min(1024) as usize);
        for _ in 0..spent_len {
            coins_spent.push(Utxo::consensus_decode(decoder)?);
        }

        let added_len = decoder.read_varint()?;
        let mut coins_added = Vec::with_capacity(added_len.min(1024) as usize);
        for _ in 0..added_len {
            coins_added.push(Commitment::from_bytes(
                decoder.read_fixed::<COMMITMENT_SIZE>()?,
            ));
        }

        Ok(Self {
            prev_header,
            coins_spent,
            coins_added,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mweb_crypto::sim::SimCrypto;
    use mweb_crypto::{BlindingFactor, Crypto};
    use mweb_mmr::LeafIndex;
    use mweb_primitives::encoding::{decode, encode};
    use mweb_primitives::transaction::Output;

    #[test]
    fn undo_roundtrip() {
        let crypto = SimCrypto::new();
        let mut blind = [0u8; 32];
        blind[0] = 3;
        let blind = BlindingFactor(blind);
        let receiver = crypto.public_key_of(&blind).unwrap();
        let output = Output::create(&crypto, &blind, receiver, 77, &blind).unwrap();
        let spent = Utxo::new(5, LeafIndex::at(2), output.clone());

        let header = Header::new(
            5,
            [1u8; 32],
            [2u8; 32],
            [3u8; 32],
            BlindingFactor::ZERO,
            BlindingFactor::ZERO,
            3,
            1,
        );

        let undo = BlockUndo::new(
            Some(Arc::new(header)),
            vec![spent],
            vec![*output.commitment()],
        );

        let decoded: BlockUndo = decode(&encode(&undo)).unwrap();
        assert_eq!(
            decoded.prev_header().unwrap().hash(),
            undo.prev_header().unwrap().hash()
        );
        assert_eq!(decoded.coins_spent(), undo.coins_spent());
        assert_eq!(decoded.coins_added(), undo.coins_added());
    }

    #[test]
    fn undo_without_prev_header() {
        let undo = BlockUndo::new(None, Vec::new(), Vec::new());
        let decoded: BlockUndo = decode(&encode(&undo)).unwrap();
        assert!(decoded.prev_header().is_none());
        assert!(decoded.coins_spent().is_empty());
    }
}
