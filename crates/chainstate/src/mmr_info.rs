//! The MMR file-generation record: the single source of truth for which
//! generation files are current. Written last during a flush so a crash
//! leaves the previous generation authoritative.

use mweb_consensus::Hash256;
use mweb_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use mweb_storage::{Column, KeyValueStore, WriteBatch};

use crate::ChainStateError;

const MMR_INFO_KEY: &[u8] = b"latest";

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MmrInfo {
    /// Schema version byte.
    pub version: u8,
    /// Generation number of the MMR and LeafSet files.
    pub index: u32,
    /// Hash of the latest header these files represent.
    pub pruned: Hash256,
    /// Generation number of the PruneList file.
    pub compact_index: u32,
    /// Header the state was compacted for; rewinding past it is
    /// impossible. Zero hash when never compacted.
    pub compacted: Option<Hash256>,
}

impl MmrInfo {
    pub fn load(store: &dyn KeyValueStore) -> Result<Option<MmrInfo>, ChainStateError> {
        match store.get(Column::MmrInfo, MMR_INFO_KEY)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(mweb_primitives::encoding::decode(&bytes)?)),
        }
    }

    pub fn save(&self, batch: &mut WriteBatch) {
        batch.put(
            Column::MmrInfo,
            MMR_INFO_KEY,
            mweb_primitives::encoding::encode(self),
        );
    }
}

impl Encodable for MmrInfo {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.version);
        encoder.write_u32_be(self.index);
        encoder.write_bytes(&self.pruned);
        encoder.write_u32_be(self.compact_index);
        encoder.write_bytes(&self.compacted.unwrap_or([0u8; 32]));
    }
}

impl Decodable for MmrInfo {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_u8()?;
        let index = decoder.read_u32_be()?;
        let pruned = decoder.read_fixed::<32>()?;
        let compact_index = decoder.read_u32_be()?;
        let compacted = decoder.read_fixed::<32>()?;
        Ok(Self {
            version,
            index,
            pruned,
            compact_index,
            compacted: if compacted == [0u8; 32] {
                None
            } else {
                Some(compacted)
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mweb_storage::memory::MemoryStore;

    #[test]
    fn save_and_load_latest() {
        let store = MemoryStore::new();
        assert!(MmrInfo::load(&store).unwrap().is_none());

        let info = MmrInfo {
            version: 0,
            index: 3,
            pruned: [9u8; 32],
            compact_index: 1,
            compacted: Some([7u8; 32]),
        };
        let mut batch = WriteBatch::new();
        info.save(&mut batch);
        store.write_batch(&batch).unwrap();

        assert_eq!(MmrInfo::load(&store).unwrap(), Some(info));
    }

    #[test]
    fn zero_compacted_hash_is_none() {
        let store = MemoryStore::new();
        let info = MmrInfo {
            version: 0,
            index: 1,
            pruned: [1u8; 32],
            compact_index: 0,
            compacted: None,
        };
        let mut batch = WriteBatch::new();
        info.save(&mut batch);
        store.write_batch(&batch).unwrap();

        assert_eq!(MmrInfo::load(&store).unwrap().unwrap().compacted, None);
    }
}
