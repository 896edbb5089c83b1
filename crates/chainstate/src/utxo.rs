//! UTXO model and its per-commitment store.

use std::sync::Arc;

use mweb_crypto::Commitment;
use mweb_mmr::LeafIndex;
use mweb_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use mweb_primitives::transaction::{Output, OutputId};
use mweb_storage::{Column, KeyValueStore, WriteBatch};

use crate::ChainStateError;

/// An unspent output plus its chain-position metadata.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Utxo {
    block_height: u64,
    leaf_index: LeafIndex,
    output: Output,
}

impl Utxo {
    pub fn new(block_height: u64, leaf_index: LeafIndex, output: Output) -> Self {
        Self {
            block_height,
            leaf_index,
            output,
        }
    }

    pub fn block_height(&self) -> u64 {
        self.block_height
    }

    pub fn leaf_index(&self) -> LeafIndex {
        self.leaf_index
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn commitment(&self) -> &Commitment {
        self.output.commitment()
    }

    pub fn is_pegged_in(&self) -> bool {
        self.output.is_pegged_in()
    }

    pub fn to_output_id(&self) -> OutputId {
        self.output.to_output_id()
    }
}

impl Encodable for Utxo {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u64_be(self.block_height);
        encoder.write_u64_be(self.leaf_index.get());
        self.output.consensus_encode(encoder);
    }
}

impl Decodable for Utxo {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let block_height = decoder.read_u64_be()?;
        let leaf_index = LeafIndex::at(decoder.read_u64_be()?);
        let output = Output::consensus_decode(decoder)?;
        Ok(Self {
            block_height,
            leaf_index,
            output,
        })
    }
}

/// Persistent UTXO lists keyed by commitment.
///
/// A commitment maps to the ordered list of live UTXOs carrying it
/// (normally one entry; duplicates are rare but legal, and the last
/// entry is the authoritative one).
pub struct CoinStore<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> CoinStore<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    pub fn get_utxos(&self, commitment: &Commitment) -> Result<Vec<Arc<Utxo>>, ChainStateError> {
        match self.store.get(Column::Utxo, commitment.as_bytes())? {
            None => Ok(Vec::new()),
            Some(bytes) => decode_utxo_list(&bytes),
        }
    }

    /// Emit the batch op replacing a commitment's UTXO list.
    pub fn write_utxos(
        &self,
        batch: &mut WriteBatch,
        commitment: &Commitment,
        utxos: &[Arc<Utxo>],
    ) {
        if utxos.is_empty() {
            batch.delete(Column::Utxo, *commitment.as_bytes());
        } else {
            batch.put(Column::Utxo, *commitment.as_bytes(), encode_utxo_list(utxos));
        }
    }
}

fn encode_utxo_list(utxos: &[Arc<Utxo>]) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_varint(utxos.len() as u64);
    for utxo in utxos {
        utxo.consensus_encode(&mut encoder);
    }
    encoder.into_inner()
}

fn decode_utxo_list(bytes: &[u8]) -> Result<Vec<Arc<Utxo>>, ChainStateError> {
    let mut decoder = Decoder::new(bytes);
    let len = decoder.read_varint()?;
    let mut utxos = Vec::with_capacity(len.min(64) as usize);
    for _ in 0..len {
        utxos.push(Arc::new(Utxo::consensus_decode(&mut decoder)?));
    }
    if !decoder.is_empty() {
        return Err(ChainStateError::Decode(DecodeError::TrailingBytes));
    }
    Ok(utxos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mweb_crypto::sim::SimCrypto;
    use mweb_crypto::{BlindingFactor, Crypto};
    use mweb_storage::memory::MemoryStore;

    fn blind(byte: u8) -> BlindingFactor {
        let mut bytes = [0u8; 32];
        bytes[0] = byte;
        BlindingFactor(bytes)
    }

    fn sample_utxo(crypto: &SimCrypto, height: u64, leaf: u64, value: u64) -> Arc<Utxo> {
        let receiver = crypto.public_key_of(&blind(9)).unwrap();
        let output = Output::create(crypto, &blind(1), receiver, value, &blind(2)).unwrap();
        Arc::new(Utxo::new(height, LeafIndex::at(leaf), output))
    }

    #[test]
    fn utxo_roundtrip() {
        let crypto = SimCrypto::new();
        let utxo = sample_utxo(&crypto, 150, 3, 1000);
        let encoded = mweb_primitives::encoding::encode(utxo.as_ref());
        let decoded: Utxo = mweb_primitives::encoding::decode(&encoded).unwrap();
        assert_eq!(&decoded, utxo.as_ref());
    }

    #[test]
    fn store_list_roundtrip() {
        let crypto = SimCrypto::new();
        let store = MemoryStore::new();
        let utxo = sample_utxo(&crypto, 10, 0, 42);
        let commitment = *utxo.commitment();

        let mut batch = WriteBatch::new();
        CoinStore::new(&store).write_utxos(&mut batch, &commitment, &[Arc::clone(&utxo)]);
        store.write_batch(&batch).unwrap();

        let loaded = CoinStore::new(&store).get_utxos(&commitment).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].as_ref(), utxo.as_ref());

        let mut batch = WriteBatch::new();
        CoinStore::new(&store).write_utxos(&mut batch, &commitment, &[]);
        store.write_batch(&batch).unwrap();
        assert!(CoinStore::new(&store)
            .get_utxos(&commitment)
            .unwrap()
            .is_empty());
    }
}
