//! Cache-over-file-backend round trips: flush a cache into a new file
//! generation, reload it, and keep going.

use std::sync::{Arc, RwLock};

use mweb_mmr::backend::FileBackend;
use mweb_mmr::{Index, LeafIndex, Mmr, MmrCache, MmrOps, SharedMmr};
use mweb_storage::memory::MemoryStore;
use mweb_storage::{Column, KeyValueStore, WriteBatch};

fn open_mmr(
    dir: &std::path::Path,
    store: &Arc<dyn KeyValueStore>,
    file_index: u32,
) -> Mmr<FileBackend> {
    let backend = FileBackend::open(
        Column::KernelLeaf,
        'K',
        dir,
        file_index,
        Arc::clone(store),
        None,
    )
    .expect("open backend");
    Mmr::new(backend)
}

#[test]
fn cache_flush_generation_reload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

    let base = open_mmr(dir.path(), &store, 0);
    let shared: SharedMmr = Arc::new(RwLock::new(base));

    // First batch of appends goes through a cache.
    let mut cache = MmrCache::new(Arc::clone(&shared));
    for i in 0u8..7 {
        cache.add_leaf(vec![i; 4]).unwrap();
    }
    let root_after_7 = cache.root().unwrap();

    let mut batch = WriteBatch::new();
    cache.flush(1, &mut batch).unwrap();
    store.write_batch(&batch).unwrap();

    assert_eq!(shared.read().unwrap().root().unwrap(), root_after_7);

    // Reload the flushed generation from disk and database.
    let reloaded = open_mmr(dir.path(), &store, 1);
    assert_eq!(reloaded.num_leaves(), 7);
    assert_eq!(reloaded.root().unwrap(), root_after_7);
    assert_eq!(reloaded.leaf(&LeafIndex::at(3)).unwrap().data(), &[3; 4]);

    // A second cache continues on top of the reloaded state.
    let shared: SharedMmr = Arc::new(RwLock::new(reloaded));
    let mut cache = MmrCache::new(Arc::clone(&shared));
    for i in 7u8..12 {
        cache.add_leaf(vec![i; 4]).unwrap();
    }

    // Compare against a flat rebuild of all 12 leaves.
    let flat_dir = tempfile::tempdir().expect("tempdir");
    let flat_store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let mut flat = open_mmr(flat_dir.path(), &flat_store, 0);
    for i in 0u8..12 {
        flat.add_leaf(vec![i; 4]).unwrap();
    }
    assert_eq!(cache.root().unwrap(), flat.root().unwrap());
    assert_eq!(
        cache.hash_at(&Index::at(2)).unwrap(),
        flat.hash_at(&Index::at(2)).unwrap()
    );
}

#[test]
fn rewind_below_flushed_generation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

    let mut mmr = open_mmr(dir.path(), &store, 0);
    for i in 0u8..9 {
        mmr.add_leaf(vec![i]).unwrap();
    }
    let root_at_5 = {
        let mut probe = open_mmr(dir.path(), &store, 0);
        for i in 0u8..5 {
            probe.add_leaf(vec![i]).unwrap();
        }
        probe.root().unwrap()
    };

    mmr.rewind(5).unwrap();
    assert_eq!(mmr.num_leaves(), 5);
    assert_eq!(mmr.root().unwrap(), root_at_5);

    // Nodes built past the rewind point are gone.
    assert!(mmr.hash_at(&Index::at(9)).is_err());
}
