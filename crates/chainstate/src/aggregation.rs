//! Merging transactions into one aggregate transaction.

use std::sync::Arc;

use mweb_crypto::{BlindingFactor, Crypto};
use mweb_primitives::transaction::Transaction;

use crate::ChainStateError;

/// Aggregate multiple transactions into one.
///
/// An empty list yields the empty transaction; a singleton is returned
/// unchanged. For more, the component lists are concatenated and the
/// offsets summed; `Transaction::create` re-sorts everything into
/// canonical order, so callers must never assume the concatenation
/// order survives.
pub fn aggregate(
    crypto: &dyn Crypto,
    transactions: &[Arc<Transaction>],
) -> Result<Arc<Transaction>, ChainStateError> {
    if transactions.is_empty() {
        return Ok(Transaction::empty());
    }

    if transactions.len() == 1 {
        return Ok(Arc::clone(&transactions[0]));
    }

    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    let mut kernels = Vec::new();
    let mut owner_sigs = Vec::new();
    let mut kernel_offsets: Vec<BlindingFactor> = Vec::with_capacity(transactions.len());
    let mut owner_offsets: Vec<BlindingFactor> = Vec::with_capacity(transactions.len());

    for transaction in transactions {
        inputs.extend_from_slice(transaction.inputs());
        outputs.extend_from_slice(transaction.outputs());
        kernels.extend_from_slice(transaction.kernels());
        owner_sigs.extend_from_slice(transaction.owner_sigs());
        kernel_offsets.push(*transaction.kernel_offset());
        owner_offsets.push(*transaction.owner_offset());
    }

    let kernel_offset = crypto.add_blinding_factors(&kernel_offsets, &[])?;
    let owner_offset = crypto.add_blinding_factors(&owner_offsets, &[])?;

    Ok(Transaction::create(
        kernel_offset,
        owner_offset,
        inputs,
        outputs,
        kernels,
        owner_sigs,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mweb_crypto::sim::SimCrypto;

    #[test]
    fn empty_list_yields_empty_transaction() {
        let crypto = SimCrypto::new();
        let aggregated = aggregate(&crypto, &[]).unwrap();
        assert!(aggregated.inputs().is_empty());
        assert!(aggregated.outputs().is_empty());
        assert!(aggregated.kernels().is_empty());
        assert!(aggregated.kernel_offset().is_zero());
    }

    #[test]
    fn singleton_is_returned_unchanged() {
        let crypto = SimCrypto::new();
        let mut blind = [0u8; 32];
        blind[0] = 5;
        let transaction = Transaction::create(
            BlindingFactor(blind),
            BlindingFactor::ZERO,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        );

        let aggregated = aggregate(&crypto, &[Arc::clone(&transaction)]).unwrap();
        assert!(Arc::ptr_eq(&aggregated, &transaction));
    }
}
