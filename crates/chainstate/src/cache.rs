//! The copy-on-write cache view: speculative block application over an
//! untouched base, with explicit flush.

use std::sync::{Arc, RwLock};

use mweb_consensus::ConsensusError;
use mweb_crypto::{BlindingFactor, Commitment, CryptoCtx};
use mweb_log::log_trace;
use mweb_mmr::{LeafIndex, LeafSetCache, LeafSetOps, MmrCache, MmrOps, SharedLeafSet, SharedMmr};
use mweb_primitives::block::{Block, Header};
use mweb_primitives::encoding::encode;
use mweb_primitives::transaction::{Output, Transaction};
use mweb_storage::{KeyValueStore, WriteBatch};

use crate::aggregation;
use crate::mmr_info::MmrInfo;
use crate::undo::BlockUndo;
use crate::utxo::Utxo;
use crate::validation::kernel_sums;
use crate::view::{validate_mmrs, CoinAction, CoinsViewUpdates, SharedView};
use crate::ChainStateError;

pub struct CacheView {
    base: SharedView,
    header: Option<Arc<Header>>,
    store: Arc<dyn KeyValueStore>,
    crypto: CryptoCtx,
    leafset: Arc<RwLock<LeafSetCache>>,
    kernel_mmr: Arc<RwLock<MmrCache>>,
    output_mmr: Arc<RwLock<MmrCache>>,
    updates: CoinsViewUpdates,
}

impl CacheView {
    pub fn new(base: SharedView) -> Self {
        let (header, store, crypto, leafset, kernel_mmr, output_mmr) = {
            let base = base.read().expect("view lock");
            (
                base.best_header(),
                base.store(),
                base.crypto(),
                LeafSetCache::new(base.leafset()),
                MmrCache::new(base.kernel_mmr()),
                MmrCache::new(base.output_mmr()),
            )
        };

        Self {
            base,
            header,
            store,
            crypto,
            leafset: Arc::new(RwLock::new(leafset)),
            kernel_mmr: Arc::new(RwLock::new(kernel_mmr)),
            output_mmr: Arc::new(RwLock::new(output_mmr)),
            updates: CoinsViewUpdates::new(),
        }
    }

    pub fn best_header(&self) -> Option<Arc<Header>> {
        self.header.clone()
    }

    pub fn set_best_header(&mut self, header: Option<Arc<Header>>) {
        self.header = header;
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    pub fn crypto(&self) -> CryptoCtx {
        Arc::clone(&self.crypto)
    }

    pub fn leafset(&self) -> SharedLeafSet {
        self.leafset.clone()
    }

    pub fn kernel_mmr(&self) -> SharedMmr {
        self.kernel_mmr.clone()
    }

    pub fn output_mmr(&self) -> SharedMmr {
        self.output_mmr.clone()
    }

    pub fn get_utxos(&self, commitment: &Commitment) -> Result<Vec<Arc<Utxo>>, ChainStateError> {
        let mut utxos = self.base.read().expect("view lock").get_utxos(commitment)?;

        for action in self.updates.actions_for(commitment) {
            match action {
                CoinAction::Add(utxo) => utxos.push(Arc::clone(utxo)),
                CoinAction::Spend => {
                    debug_assert!(!utxos.is_empty());
                    utxos.pop();
                }
            }
        }

        Ok(utxos)
    }

    /// True when the most recent pending action for the commitment is
    /// an unflushed add.
    pub fn has_coin_in_cache(&self, commitment: &Commitment) -> bool {
        match self.updates.actions_for(commitment).last() {
            Some(action) => !action.is_spend(),
            None => false,
        }
    }

    /// Apply a block on top of the current best header.
    ///
    /// Validates the kernel offset sum, appends kernels, spends inputs,
    /// adds outputs, then requires the resulting MMR roots and sizes to
    /// match the block's header. Returns the undo data capturing the
    /// prior state.
    pub fn apply_block(&mut self, block: &Block) -> Result<BlockUndo, ChainStateError> {
        let prev_header = self.header.clone();
        self.header = Some(Arc::clone(block.header()));

        let prev_offset = prev_header
            .as_ref()
            .map(|header| *header.kernel_offset())
            .unwrap_or(BlindingFactor::ZERO);
        kernel_sums::validate_for_block(
            &*self.crypto,
            block.body(),
            block.kernel_offset(),
            &prev_offset,
        )?;

        {
            let mut kernel_mmr = self.kernel_mmr.write().expect("mmr lock");
            for kernel in block.kernels() {
                kernel_mmr.add_leaf(encode(kernel))?;
            }
        }

        let mut coins_spent = Vec::with_capacity(block.inputs().len());
        for input in block.inputs() {
            coins_spent.push(self.spend_utxo(input.commitment())?);
        }

        let mut coins_added = Vec::with_capacity(block.outputs().len());
        for output in block.outputs() {
            self.add_utxo(block.height(), output)?;
            coins_added.push(*output.commitment());
        }

        self.validate_own_mmrs(block.header())?;

        Ok(BlockUndo::new(prev_header, coins_spent, coins_added))
    }

    /// Exact inverse of [`CacheView::apply_block`].
    pub fn undo_block(&mut self, undo: &BlockUndo) -> Result<(), ChainStateError> {
        for commitment in undo.coins_added() {
            self.updates.spend_utxo(*commitment);
        }

        let mut leaves_to_restore: Vec<LeafIndex> =
            Vec::with_capacity(undo.coins_spent().len());
        for utxo in undo.coins_spent() {
            leaves_to_restore.push(utxo.leaf_index());
            self.updates.add_utxo(Arc::new(utxo.clone()));
        }

        let prev_header = match undo.prev_header() {
            Some(header) => Arc::clone(header),
            None => {
                // Undoing the first block: back to the empty state.
                self.leafset.write().expect("leafset lock").rewind(0, &[]);
                self.kernel_mmr.write().expect("mmr lock").rewind(0)?;
                self.output_mmr.write().expect("mmr lock").rewind(0)?;
                self.header = None;
                return Ok(());
            }
        };

        self.leafset
            .write()
            .expect("leafset lock")
            .rewind(prev_header.num_txos(), &leaves_to_restore);
        self.kernel_mmr
            .write()
            .expect("mmr lock")
            .rewind(prev_header.num_kernels())?;
        self.output_mmr
            .write()
            .expect("mmr lock")
            .rewind(prev_header.num_txos())?;
        self.header = Some(Arc::clone(&prev_header));

        // Sanity check that the rewind landed on the prior state.
        self.validate_own_mmrs(&prev_header)
    }

    /// Aggregate `transactions`, apply them to this cache's layers, and
    /// assemble the block whose header commits to the result.
    pub fn build_next_block(
        &mut self,
        height: u64,
        transactions: &[Arc<Transaction>],
    ) -> Result<Block, ChainStateError> {
        log_trace!("building block with {} transactions", transactions.len());

        let transaction = aggregation::aggregate(&*self.crypto, transactions)?;

        {
            let mut kernel_mmr = self.kernel_mmr.write().expect("mmr lock");
            for kernel in transaction.kernels() {
                kernel_mmr.add_leaf(encode(kernel))?;
            }
        }

        for output in transaction.outputs() {
            self.add_utxo(height, output)?;
        }

        for input in transaction.inputs() {
            self.spend_utxo(input.commitment())?;
        }

        let output_mmr_size = self.output_mmr.read().expect("mmr lock").num_leaves();
        let kernel_mmr_size = self.kernel_mmr.read().expect("mmr lock").num_leaves();
        let output_root = self.output_mmr.read().expect("mmr lock").root()?;
        let kernel_root = self.kernel_mmr.read().expect("mmr lock").root()?;
        let leafset_root = self.leafset.read().expect("leafset lock").root();

        let kernel_offset = match &self.header {
            Some(header) => self.crypto.add_blinding_factors(
                &[*header.kernel_offset(), *transaction.kernel_offset()],
                &[],
            )?,
            None => *transaction.kernel_offset(),
        };
        let owner_offset = *transaction.owner_offset();

        let header = Arc::new(Header::new(
            height,
            output_root,
            kernel_root,
            leafset_root,
            kernel_offset,
            owner_offset,
            output_mmr_size,
            kernel_mmr_size,
        ));

        Ok(Block::new(header, transaction.body().clone()))
    }

    fn add_utxo(&mut self, header_height: u64, output: &Output) -> Result<(), ChainStateError> {
        let leaf_idx = self
            .output_mmr
            .write()
            .expect("mmr lock")
            .add_leaf(encode(&output.to_output_id()))?;
        self.leafset.write().expect("leafset lock").add(&leaf_idx);

        self.updates
            .add_utxo(Arc::new(Utxo::new(header_height, leaf_idx, output.clone())));
        Ok(())
    }

    fn spend_utxo(&mut self, commitment: &Commitment) -> Result<Utxo, ChainStateError> {
        let utxos = self.get_utxos(commitment)?;
        let utxo = match utxos.last() {
            Some(utxo) => Arc::clone(utxo),
            None => return Err(ConsensusError::UtxoMissing.into()),
        };
        if !self
            .leafset
            .read()
            .expect("leafset lock")
            .contains(&utxo.leaf_index())
        {
            return Err(ConsensusError::UtxoMissing.into());
        }

        self.leafset
            .write()
            .expect("leafset lock")
            .remove(&utxo.leaf_index());
        self.updates.spend_utxo(*commitment);

        Ok(utxo.as_ref().clone())
    }

    /// Fold a child cache's updates into this cache's pending log.
    pub fn write_batch(
        &mut self,
        _batch: &mut WriteBatch,
        updates: &CoinsViewUpdates,
        header: Option<Arc<Header>>,
    ) -> Result<(), ChainStateError> {
        self.header = header;

        for (commitment, actions) in updates.actions() {
            for action in actions {
                match action {
                    CoinAction::Add(utxo) => self.updates.add_utxo(Arc::clone(utxo)),
                    CoinAction::Spend => self.updates.spend_utxo(*commitment),
                }
            }
        }

        Ok(())
    }

    /// Push all pending changes into the base view.
    ///
    /// When the base is durable this advances the MMR file generation,
    /// flushes the LeafSet and both MMRs into it, and persists the
    /// MMR-info record last — so a crash mid-flush leaves the previous
    /// generation authoritative.
    pub fn flush(&mut self, batch: &mut WriteBatch) -> Result<(), ChainStateError> {
        // Nothing was ever applied on an empty base; leave it alone.
        if self.header.is_none()
            && self
                .base
                .read()
                .expect("view lock")
                .best_header()
                .is_none()
        {
            return Ok(());
        }

        let base_is_cache = {
            let mut base = self.base.write().expect("view lock");
            base.write_batch(batch, &self.updates, self.header.clone())?;
            base.is_cache()
        };

        let mut mmr_info = MmrInfo::default();
        if !base_is_cache {
            if let Some(current) = MmrInfo::load(&*self.store)? {
                mmr_info = current;
            }
            mmr_info.index += 1;
        }

        self.leafset
            .write()
            .expect("leafset lock")
            .flush(mmr_info.index)?;
        self.kernel_mmr
            .write()
            .expect("mmr lock")
            .flush(mmr_info.index, batch)?;
        self.output_mmr
            .write()
            .expect("mmr lock")
            .flush(mmr_info.index, batch)?;

        if !base_is_cache {
            mmr_info.save(batch);
        }

        self.updates.clear();
        Ok(())
    }

    fn validate_own_mmrs(&self, header: &Header) -> Result<(), ChainStateError> {
        validate_mmrs(
            &self.leafset(),
            &self.kernel_mmr(),
            &self.output_mmr(),
            header,
        )
    }

    /// Walk the full state in this view and re-check the global balance
    /// equation.
    pub fn validate_state(&self) -> Result<(), ChainStateError> {
        crate::validation::validate_view_state(
            &*self.crypto,
            &self.leafset(),
            &self.kernel_mmr(),
            &self.output_mmr(),
            self.header.as_deref(),
        )
    }
}
