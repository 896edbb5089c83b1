//! The coins-view sum type and the pending-action log.
//!
//! Two concrete views exist: the durable, database-backed view and the
//! in-memory cache overlay. The set is closed, so they are variants of
//! one enum dispatched by match; a cache holds an explicit shared
//! reference to its base, never a back-reference.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use mweb_consensus::ConsensusError;
use mweb_crypto::{Commitment, CryptoCtx};
use mweb_log::log_debug;
use mweb_mmr::{LeafSetOps, MmrOps, SharedLeafSet, SharedMmr};
use mweb_primitives::block::Header;
use mweb_primitives::hash::to_hex;
use mweb_storage::{KeyValueStore, WriteBatch};

use crate::cache::CacheView;
use crate::db::DbView;
use crate::utxo::Utxo;
use crate::ChainStateError;

/// One pending change to a commitment's UTXO list.
#[derive(Clone, Debug)]
pub enum CoinAction {
    Add(Arc<Utxo>),
    Spend,
}

impl CoinAction {
    pub fn is_spend(&self) -> bool {
        matches!(self, CoinAction::Spend)
    }
}

/// Ordered log of pending adds and spends per commitment.
#[derive(Clone, Debug, Default)]
pub struct CoinsViewUpdates {
    actions: HashMap<Commitment, Vec<CoinAction>>,
}

impl CoinsViewUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_utxo(&mut self, utxo: Arc<Utxo>) {
        let commitment = *utxo.commitment();
        self.push_action(commitment, CoinAction::Add(utxo));
    }

    pub fn spend_utxo(&mut self, commitment: Commitment) {
        self.push_action(commitment, CoinAction::Spend);
    }

    fn push_action(&mut self, commitment: Commitment, action: CoinAction) {
        self.actions.entry(commitment).or_default().push(action);
    }

    pub fn actions(&self) -> &HashMap<Commitment, Vec<CoinAction>> {
        &self.actions
    }

    pub fn actions_for(&self, commitment: &Commitment) -> &[CoinAction] {
        self.actions
            .get(commitment)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }
}

/// Shared handle to a view, so caches can layer over bases that
/// outlive them. Single writer at a time; the external chainstate lock
/// serializes connect/disconnect.
pub type SharedView = Arc<RwLock<View>>;

/// A view of the extension block's UTXO set at some header.
pub enum View {
    /// Database- and file-backed state.
    Durable(DbView),
    /// Copy-on-write overlay over a base view.
    Cache(CacheView),
}

impl View {
    pub fn is_cache(&self) -> bool {
        matches!(self, View::Cache(_))
    }

    pub fn into_shared(self) -> SharedView {
        Arc::new(RwLock::new(self))
    }

    pub fn best_header(&self) -> Option<Arc<Header>> {
        match self {
            View::Durable(view) => view.best_header(),
            View::Cache(view) => view.best_header(),
        }
    }

    pub fn set_best_header(&mut self, header: Option<Arc<Header>>) {
        match self {
            View::Durable(view) => view.set_best_header(header),
            View::Cache(view) => view.set_best_header(header),
        }
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        match self {
            View::Durable(view) => view.store(),
            View::Cache(view) => view.store(),
        }
    }

    pub fn crypto(&self) -> CryptoCtx {
        match self {
            View::Durable(view) => view.crypto(),
            View::Cache(view) => view.crypto(),
        }
    }

    pub fn leafset(&self) -> SharedLeafSet {
        match self {
            View::Durable(view) => view.leafset(),
            View::Cache(view) => view.leafset(),
        }
    }

    pub fn kernel_mmr(&self) -> SharedMmr {
        match self {
            View::Durable(view) => view.kernel_mmr(),
            View::Cache(view) => view.kernel_mmr(),
        }
    }

    pub fn output_mmr(&self) -> SharedMmr {
        match self {
            View::Durable(view) => view.output_mmr(),
            View::Cache(view) => view.output_mmr(),
        }
    }

    /// All live UTXOs for a commitment, oldest first. Callers treat the
    /// last entry as authoritative when duplicates exist.
    pub fn get_utxos(&self, commitment: &Commitment) -> Result<Vec<Arc<Utxo>>, ChainStateError> {
        match self {
            View::Durable(view) => view.get_utxos(commitment),
            View::Cache(view) => view.get_utxos(commitment),
        }
    }

    pub fn has_coin(&self, commitment: &Commitment) -> Result<bool, ChainStateError> {
        Ok(!self.get_utxos(commitment)?.is_empty())
    }

    /// True only for coins added but not yet flushed through this view.
    pub fn has_coin_in_cache(&self, commitment: &Commitment) -> bool {
        match self {
            View::Durable(_) => false,
            View::Cache(view) => view.has_coin_in_cache(commitment),
        }
    }

    /// Fold a child cache's updates into this view. `header` is `None`
    /// when the child rewound past the first block.
    pub fn write_batch(
        &mut self,
        batch: &mut WriteBatch,
        updates: &CoinsViewUpdates,
        header: Option<Arc<Header>>,
    ) -> Result<(), ChainStateError> {
        match self {
            View::Durable(view) => view.write_batch(batch, updates, header),
            View::Cache(view) => view.write_batch(batch, updates, header),
        }
    }

    /// Drop LeafSet/output-MMR generations older than the persisted
    /// MMR-info record. No-op for caches.
    pub fn compact(&self) -> Result<(), ChainStateError> {
        match self {
            View::Durable(view) => view.compact(),
            View::Cache(_) => Ok(()),
        }
    }

    /// Check this view's MMR roots and sizes against a header. Any
    /// mismatch is a fatal consensus failure.
    pub fn validate_mmrs(&self, header: &Header) -> Result<(), ChainStateError> {
        validate_mmrs(
            &self.leafset(),
            &self.kernel_mmr(),
            &self.output_mmr(),
            header,
        )
    }
}

pub(crate) fn validate_mmrs(
    leafset: &SharedLeafSet,
    kernel_mmr: &SharedMmr,
    output_mmr: &SharedMmr,
    header: &Header,
) -> Result<(), ChainStateError> {
    let kernel_mmr = kernel_mmr.read().expect("mmr lock");
    let output_mmr = output_mmr.read().expect("mmr lock");
    let leafset = leafset.read().expect("leafset lock");

    if *header.kernel_root() != kernel_mmr.root()?
        || header.num_kernels() != kernel_mmr.num_leaves()
        || *header.output_root() != output_mmr.root()?
        || header.num_txos() != output_mmr.num_leaves()
        || *header.leafset_root() != leafset.root()
    {
        log_debug!("kernel root: {}", to_hex(&kernel_mmr.root()?));
        log_debug!("leafset root: {}", to_hex(&leafset.root()));
        return Err(ConsensusError::MmrMismatch.into());
    }

    Ok(())
}
