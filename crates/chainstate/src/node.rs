//! Top-level entry points. Consensus failures unwind to here, get
//! logged with the specific error and offending hash, and surface as
//! boolean results to the embedding node.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mweb_crypto::CryptoCtx;
use mweb_log::{log_error, log_trace};
use mweb_primitives::block::{Block, Header};
use mweb_primitives::hash::to_hex;
use mweb_primitives::kernel::{PegInCoin, PegOutCoin};
use mweb_primitives::transaction::Transaction;
use mweb_storage::{KeyValueStore, WriteBatch};

use crate::cache::CacheView;
use crate::chain::Chain;
use crate::db::DbView;
use crate::factory::{self, StateSnapshot};
use crate::undo::BlockUndo;
use crate::validation::{self, BlockValidator};
use crate::view::{SharedView, View};
use crate::ChainStateError;

pub struct Node {
    datadir: PathBuf,
    crypto: CryptoCtx,
    db_view: SharedView,
}

impl Node {
    /// Open the node state from disk (or start fresh when nothing is
    /// persisted yet).
    pub fn init(
        datadir: &Path,
        store: Arc<dyn KeyValueStore>,
        crypto: CryptoCtx,
        best_header: Option<Arc<Header>>,
    ) -> Result<Self, ChainStateError> {
        let db_view = DbView::open(datadir, store, Arc::clone(&crypto), best_header)?;
        Ok(Self {
            datadir: datadir.to_path_buf(),
            crypto,
            db_view: View::Durable(db_view).into_shared(),
        })
    }

    pub fn db_view(&self) -> SharedView {
        Arc::clone(&self.db_view)
    }

    pub fn crypto(&self) -> CryptoCtx {
        Arc::clone(&self.crypto)
    }

    pub fn datadir(&self) -> &Path {
        &self.datadir
    }

    /// Full block validation against the expected hash and peg sets.
    pub fn validate_block(
        &self,
        block: &Block,
        mweb_hash: &[u8; 32],
        pegin_coins: &[PegInCoin],
        pegout_coins: &[PegOutCoin],
    ) -> Result<(), ChainStateError> {
        log_trace!("validating block {}", to_hex(block.hash()));
        BlockValidator::validate(&*self.crypto, block, mweb_hash, pegin_coins, pegout_coins)
    }

    /// Apply a block to the given view (through a throwaway cache, so
    /// the view is only touched on success) and return the undo data.
    pub fn connect_block(
        &self,
        block: &Block,
        view: &SharedView,
        batch: &mut WriteBatch,
    ) -> Result<BlockUndo, ChainStateError> {
        log_trace!("connecting block {}", to_hex(block.hash()));

        let mut cache = CacheView::new(Arc::clone(view));
        let undo = cache.apply_block(block)?;
        cache.flush(batch)?;

        log_trace!("block {} connected", to_hex(block.hash()));
        Ok(undo)
    }

    /// Disconnect the tip block using its undo data.
    pub fn disconnect_block(
        &self,
        undo: &BlockUndo,
        view: &SharedView,
        batch: &mut WriteBatch,
    ) -> Result<(), ChainStateError> {
        let mut cache = CacheView::new(Arc::clone(view));
        cache.undo_block(undo)?;
        cache.flush(batch)?;

        log_trace!(
            "block disconnected, new tip {}",
            view.read()
                .expect("view lock")
                .best_header()
                .map(|header| to_hex(header.hash()))
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(())
    }

    /// Replace the node state with a rebuilt snapshot state.
    pub fn apply_state(
        &mut self,
        store: Arc<dyn KeyValueStore>,
        chain: &dyn Chain,
        state: &StateSnapshot,
    ) -> Result<SharedView, ChainStateError> {
        let db_view = factory::create_db_view(
            store,
            Arc::clone(&self.crypto),
            chain,
            &self.datadir,
            state,
        )?;
        self.db_view = View::Durable(db_view).into_shared();
        Ok(self.db_view())
    }

    /// Boolean wrapper around block validation; logs the failure.
    pub fn check_block(
        &self,
        block: &Block,
        mweb_hash: &[u8; 32],
        pegin_coins: &[PegInCoin],
        pegout_coins: &[PegOutCoin],
    ) -> bool {
        match self.validate_block(block, mweb_hash, pegin_coins, pegout_coins) {
            Ok(()) => true,
            Err(err) => {
                log_error!("failed to validate block {}: {err}", to_hex(block.hash()));
                false
            }
        }
    }

    /// Boolean wrapper around context-free transaction validation.
    pub fn check_transaction(&self, transaction: &Transaction) -> bool {
        match validation::validate_transaction(&*self.crypto, transaction) {
            Ok(()) => true,
            Err(err) => {
                log_error!(
                    "failed to validate transaction {}: {err}",
                    to_hex(transaction.hash())
                );
                false
            }
        }
    }

    /// Boolean wrapper around the height-aware input check.
    pub fn check_tx_inputs(
        &self,
        view: &SharedView,
        transaction: &Transaction,
        spend_height: u64,
    ) -> bool {
        let view = view.read().expect("view lock");
        match validation::check_tx_inputs(&view, transaction, spend_height) {
            Ok(()) => true,
            Err(err) => {
                log_error!(
                    "failed to validate inputs of {}: {err}",
                    to_hex(transaction.hash())
                );
                false
            }
        }
    }
}
