//! End-to-end: mine a peg-in block, watch visibility move through the
//! cache layers, flush, and disconnect.

mod common;

use std::sync::Arc;

use mweb_chainstate::validation::{check_tx_inputs, BlockValidator};
use mweb_chainstate::{BlockBuilder, CacheView, Node};
use mweb_consensus::{ConsensusError, PEGIN_MATURITY};
use mweb_mmr::{LeafSetOps, MmrOps};
use mweb_storage::memory::MemoryStore;
use mweb_storage::{KeyValueStore, WriteBatch};

use common::TxFactory;

#[test]
fn pegin_block_lifecycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let crypto = common::crypto_ctx();
    let node = Node::init(dir.path(), Arc::clone(&store), Arc::clone(&crypto), None).unwrap();

    let mut factory = TxFactory::new(Arc::clone(&crypto));
    let (tx, pegins, coin) = factory.pegin_tx(1000);

    // Assemble the block at height 150.
    let mut builder = BlockBuilder::new(150, node.db_view());
    assert!(builder.add_transaction(&tx, &pegins));
    let block = builder.build_block().unwrap();
    assert_eq!(block.height(), 150);
    assert_eq!(block.supply_change(), 1000);

    // Full validation against the committed peg-in set.
    BlockValidator::validate(&*crypto, &block, block.hash(), &pegins, &[]).unwrap();
    assert!(block.was_validated());
    // Re-validation is a no-op.
    BlockValidator::validate(&*crypto, &block, &[0u8; 32], &pegins, &[]).unwrap();

    // Apply speculatively: visible in the cache, not in the base.
    let mut cache = CacheView::new(node.db_view());
    let undo = cache.apply_block(&block).unwrap();

    let commitment = coin.output.commitment();
    assert_eq!(cache.get_utxos(commitment).unwrap().len(), 1);
    assert!(cache.has_coin_in_cache(commitment));
    assert!(node
        .db_view()
        .read()
        .unwrap()
        .get_utxos(commitment)
        .unwrap()
        .is_empty());

    // Flush: the base now sees the coin, the cache no longer buffers it.
    let mut batch = WriteBatch::new();
    cache.flush(&mut batch).unwrap();
    store.write_batch(&batch).unwrap();

    assert_eq!(
        node.db_view()
            .read()
            .unwrap()
            .get_utxos(commitment)
            .unwrap()
            .len(),
        1
    );
    assert!(!cache.has_coin_in_cache(commitment));
    assert_eq!(
        node.db_view().read().unwrap().best_header().unwrap().hash(),
        block.hash()
    );
    cache.validate_state().unwrap();

    // The fresh peg-in output is immature until height 150 + 20.
    {
        let (spend, _) = factory.spend_tx(&[coin.clone()], &[990], 10);
        let view = node.db_view();
        let view = view.read().unwrap();
        let err = check_tx_inputs(&view, &spend, 151).unwrap_err();
        assert_eq!(err.consensus(), Some(ConsensusError::PeginMaturity));
        check_tx_inputs(&view, &spend, 150 + PEGIN_MATURITY).unwrap();
    }

    // Disconnect: both layers forget the coin.
    let mut undo_batch = WriteBatch::new();
    node.disconnect_block(&undo, &node.db_view(), &mut undo_batch)
        .unwrap();
    store.write_batch(&undo_batch).unwrap();

    assert!(node
        .db_view()
        .read()
        .unwrap()
        .get_utxos(commitment)
        .unwrap()
        .is_empty());
    assert!(node.db_view().read().unwrap().best_header().is_none());
}

#[test]
fn apply_undo_roundtrip_restores_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let crypto = common::crypto_ctx();
    let node = Node::init(dir.path(), Arc::clone(&store), Arc::clone(&crypto), None).unwrap();

    let mut factory = TxFactory::new(Arc::clone(&crypto));

    // Block 1: two peg-ins.
    let (tx_a, pegins_a, coin_a) = factory.pegin_tx(1000);
    let (tx_b, pegins_b, coin_b) = factory.pegin_tx(500);

    let mut builder = BlockBuilder::new(1, node.db_view());
    assert!(builder.add_transaction(&tx_a, &pegins_a));
    assert!(builder.add_transaction(&tx_b, &pegins_b));
    let block1 = builder.build_block().unwrap();

    let mut batch = WriteBatch::new();
    let _undo1 = node
        .connect_block(&block1, &node.db_view(), &mut batch)
        .unwrap();
    store.write_batch(&batch).unwrap();

    let view = node.db_view();
    let roots_before = {
        let view = view.read().unwrap();
        (
            view.leafset().read().unwrap().root(),
            view.kernel_mmr().read().unwrap().root().unwrap(),
            view.output_mmr().read().unwrap().root().unwrap(),
            view.best_header().unwrap().hash().to_owned(),
        )
    };

    // Block 2 spends both coins into one change output.
    let (spend_tx, _change) = factory.spend_tx(&[coin_a, coin_b], &[1400], 100);
    let mut builder = BlockBuilder::new(2, node.db_view());
    assert!(builder.add_transaction(&spend_tx, &[]));
    let block2 = builder.build_block().unwrap();

    let mut cache = CacheView::new(node.db_view());
    let undo2 = cache.apply_block(&block2).unwrap();
    cache.undo_block(&undo2).unwrap();

    // The cache is back at the block-1 state.
    let roots_after = (
        cache.leafset().read().unwrap().root(),
        cache.kernel_mmr().read().unwrap().root().unwrap(),
        cache.output_mmr().read().unwrap().root().unwrap(),
        cache.best_header().unwrap().hash().to_owned(),
    );
    assert_eq!(roots_before, roots_after);

    // And a re-apply still works, landing on block 2's header.
    let _undo2 = cache.apply_block(&block2).unwrap();
    assert_eq!(cache.best_header().unwrap().hash(), block2.hash());
}

#[test]
fn compact_drops_stale_generations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let crypto = common::crypto_ctx();
    let node = Node::init(dir.path(), Arc::clone(&store), Arc::clone(&crypto), None).unwrap();

    let mut factory = TxFactory::new(Arc::clone(&crypto));
    let mut coin = None;
    for height in 1u64..=2 {
        let (tx, pegins, new_coin) = factory.pegin_tx(100 * height);
        coin = Some(new_coin);
        let mut builder = BlockBuilder::new(height, node.db_view());
        assert!(builder.add_transaction(&tx, &pegins));
        let block = builder.build_block().unwrap();

        let mut batch = WriteBatch::new();
        node.connect_block(&block, &node.db_view(), &mut batch)
            .unwrap();
        store.write_batch(&batch).unwrap();
    }

    // Two flushes produced generations 1 and 2.
    assert!(dir.path().join("leaf000001.dat").exists());
    assert!(dir.path().join("leaf000002.dat").exists());

    node.db_view().read().unwrap().compact().unwrap();

    assert!(!dir.path().join("leaf000001.dat").exists());
    assert!(!dir.path().join("K000001.dat").exists());
    assert!(dir.path().join("leaf000002.dat").exists());
    assert!(dir.path().join("K000002.dat").exists());

    // The live state is untouched.
    let commitment = *coin.unwrap().output.commitment();
    assert_eq!(
        node.db_view()
            .read()
            .unwrap()
            .get_utxos(&commitment)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn double_spend_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let crypto = common::crypto_ctx();
    let node = Node::init(dir.path(), Arc::clone(&store), Arc::clone(&crypto), None).unwrap();

    let mut factory = TxFactory::new(Arc::clone(&crypto));
    let (tx, pegins, coin) = factory.pegin_tx(800);

    let mut builder = BlockBuilder::new(1, node.db_view());
    assert!(builder.add_transaction(&tx, &pegins));
    let block1 = builder.build_block().unwrap();

    let mut batch = WriteBatch::new();
    node.connect_block(&block1, &node.db_view(), &mut batch)
        .unwrap();
    store.write_batch(&batch).unwrap();

    // Spend the coin at height 2.
    let (spend_tx, _) = factory.spend_tx(&[coin.clone()], &[790], 10);
    let mut builder = BlockBuilder::new(2, node.db_view());
    assert!(builder.add_transaction(&spend_tx, &[]));
    let block2 = builder.build_block().unwrap();

    let mut batch = WriteBatch::new();
    node.connect_block(&block2, &node.db_view(), &mut batch)
        .unwrap();
    store.write_batch(&batch).unwrap();

    // Spending it again fails: the builder rejects the candidate, and
    // forcing it through a cache raises UTXO_MISSING.
    let (respend_tx, _) = factory.spend_tx(&[coin], &[780], 20);
    let mut builder = BlockBuilder::new(3, node.db_view());
    assert!(!builder.add_transaction(&respend_tx, &[]));

    let mut throwaway = CacheView::new(node.db_view());
    let err = throwaway.build_next_block(3, &[respend_tx]).unwrap_err();
    assert_eq!(err.consensus(), Some(ConsensusError::UtxoMissing));
}
