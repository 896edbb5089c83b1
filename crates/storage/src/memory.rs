use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::{Column, KeyValueStore, ScanResult, StoreError, WriteBatch, WriteOp};

type MemoryStoreMap = BTreeMap<(Column, Vec<u8>), Vec<u8>>;

/// In-memory store used by tests and throwaway views.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.inner.read().expect("memory store lock");
        Ok(guard.get(&(column, key.to_vec())).cloned())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.inner.write().expect("memory store lock");
        guard.insert((column, key.to_vec()), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.inner.write().expect("memory store lock");
        guard.remove(&(column, key.to_vec()));
        Ok(())
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let guard = self.inner.read().expect("memory store lock");
        let mut results = Vec::new();
        for ((entry_column, key), value) in guard.iter() {
            if *entry_column == column && key.starts_with(prefix) {
                results.push((key.clone(), value.clone()));
            }
        }
        Ok(results)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut guard = self.inner.write().expect("memory store lock");
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    guard.insert(
                        (*column, key.as_slice().to_vec()),
                        value.as_slice().to_vec(),
                    );
                }
                WriteOp::Delete { column, key } => {
                    guard.remove(&(*column, key.as_slice().to_vec()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_is_atomic_per_commit() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Column::Utxo, b"a".as_slice(), b"1".as_slice());
        batch.put(Column::Utxo, b"b".as_slice(), b"2".as_slice());
        batch.delete(Column::Utxo, b"a".as_slice());

        assert_eq!(store.get(Column::Utxo, b"a").unwrap(), None);
        store.write_batch(&batch).unwrap();

        assert_eq!(store.get(Column::Utxo, b"a").unwrap(), None);
        assert_eq!(store.get(Column::Utxo, b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn scan_prefix_filters_by_column() {
        let store = MemoryStore::new();
        store.put(Column::KernelLeaf, b"k1", b"x").unwrap();
        store.put(Column::OutputLeaf, b"k2", b"y").unwrap();

        let kernels = store.scan_prefix(Column::KernelLeaf, b"k").unwrap();
        assert_eq!(kernels.len(), 1);
        assert_eq!(kernels[0].0, b"k1".to_vec());
    }
}
