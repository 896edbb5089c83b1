//! Incremental block assembly for the miner.

use std::collections::HashSet;
use std::sync::Arc;

use mweb_consensus::{Amount, MAX_BLOCK_WEIGHT};
use mweb_crypto::{Commitment, CryptoCtx};
use mweb_log::log_debug;
use mweb_primitives::block::Block;
use mweb_primitives::kernel::PegInCoin;
use mweb_primitives::transaction::Transaction;

use crate::aggregation;
use crate::cache::CacheView;
use crate::validation::validate_transaction;
use crate::view::SharedView;
use crate::ChainStateError;

/// Builds the next extension block transaction by transaction.
///
/// `add_transaction` rejects with `false` rather than erroring: a miner
/// legitimately expects many candidates to be rejected in normal
/// operation.
pub struct BlockBuilder {
    height: u64,
    view: SharedView,
    crypto: CryptoCtx,
    aggregated: Option<Arc<Transaction>>,
    weight: usize,
}

impl BlockBuilder {
    pub fn new(height: u64, view: SharedView) -> Self {
        let crypto = view.read().expect("view lock").crypto();
        Self {
            height,
            view,
            crypto,
            aggregated: None,
            weight: 0,
        }
    }

    /// Try to add a transaction with its claimed base-chain peg-ins.
    pub fn add_transaction(
        &mut self,
        transaction: &Arc<Transaction>,
        pegins: &[PegInCoin],
    ) -> bool {
        let weight = transaction.weight();
        if weight + self.weight > MAX_BLOCK_WEIGHT {
            log_debug!("rejecting transaction: exceeds max block weight");
            return false;
        }

        let expected_amount: Amount = pegins.iter().map(|pegin| pegin.amount).sum();
        if transaction.pegin_amount() != expected_amount {
            log_debug!("rejecting transaction: mismatched pegin amount");
            return false;
        }

        let mut pegin_commitments: HashSet<Commitment> = HashSet::with_capacity(pegins.len());
        for pegin in pegins {
            if !pegin_commitments.insert(pegin.commitment) {
                log_debug!("rejecting transaction: duplicate pegin commitments");
                return false;
            }
        }

        let tx_pegins = transaction.pegins();
        if tx_pegins.len() != pegins.len() {
            log_debug!("rejecting transaction: mismatched pegin count");
            return false;
        }
        for pegin in &tx_pegins {
            if !pegin_commitments.contains(&pegin.commitment) {
                log_debug!("rejecting transaction: pegin {} not found", pegin.commitment);
                return false;
            }
        }

        if let Err(err) = validate_transaction(&*self.crypto, transaction) {
            log_debug!("rejecting invalid transaction: {err}");
            return false;
        }

        let view = self.view.read().expect("view lock");
        for input in transaction.inputs() {
            match view.get_utxos(input.commitment()) {
                Ok(utxos) if !utxos.is_empty() => {}
                Ok(_) => {
                    log_debug!("rejecting transaction: input {} not on chain", input.commitment());
                    return false;
                }
                Err(err) => {
                    log_debug!("rejecting transaction: utxo lookup failed: {err}");
                    return false;
                }
            }
        }

        for output in transaction.outputs() {
            match view.get_utxos(output.commitment()) {
                Ok(utxos) if utxos.is_empty() => {}
                Ok(_) => {
                    log_debug!(
                        "rejecting transaction: output {} already on chain",
                        output.commitment()
                    );
                    return false;
                }
                Err(err) => {
                    log_debug!("rejecting transaction: utxo lookup failed: {err}");
                    return false;
                }
            }
        }
        drop(view);

        let aggregated = match &self.aggregated {
            None => Arc::clone(transaction),
            Some(current) => {
                match aggregation::aggregate(
                    &*self.crypto,
                    &[Arc::clone(current), Arc::clone(transaction)],
                ) {
                    Ok(aggregated) => aggregated,
                    Err(err) => {
                        log_debug!("failed to aggregate transaction: {err}");
                        return false;
                    }
                }
            }
        };

        self.aggregated = Some(aggregated);
        self.weight += weight;
        true
    }

    /// Assemble the block in a throwaway cache over the base view.
    pub fn build_block(&self) -> Result<Block, ChainStateError> {
        let mut cache = CacheView::new(Arc::clone(&self.view));

        let transactions: Vec<Arc<Transaction>> =
            self.aggregated.iter().map(Arc::clone).collect();

        cache.build_next_block(self.height, &transactions)
    }

    pub fn weight(&self) -> usize {
        self.weight
    }
}
