//! Consensus validation: kernel and owner balance equations, full
//! block/transaction checks, and the block validator state machine.

use std::collections::HashMap;

use mweb_consensus::{Amount, ConsensusError, Hash256, PEGIN_MATURITY};
use mweb_crypto::{BlindingFactor, Commitment, Crypto, PublicKey};
use mweb_log::log_error;
use mweb_mmr::{LeafIndex, LeafSetOps, MmrOps, SharedLeafSet, SharedMmr};
use mweb_primitives::block::{Block, Header};
use mweb_primitives::kernel::{Kernel, PegInCoin, PegOutCoin};
use mweb_primitives::transaction::{OutputId, Transaction, TxBody};

use crate::view::View;
use crate::ChainStateError;

/// The homomorphic balance check: outputs minus inputs, net of the
/// public supply change, must equal the kernel excesses plus the
/// offset's blinding-only commitment.
pub mod kernel_sums {
    use super::*;

    /// Validate a full reconstructed state: every unspent commitment
    /// against every kernel ever committed. The running supply total
    /// must never go negative at any kernel prefix.
    pub fn validate_state(
        crypto: &dyn Crypto,
        utxo_commitments: &[Commitment],
        kernels: &[Kernel],
        total_offset: &BlindingFactor,
    ) -> Result<(), ChainStateError> {
        let mut total_supply: Amount = 0;
        for kernel in kernels {
            total_supply += kernel.supply_change();
            if total_supply < 0 {
                return Err(ConsensusError::BlockSums.into());
            }
        }

        let kernel_commits: Vec<Commitment> =
            kernels.iter().map(|k| *k.commitment()).collect();
        validate_sums(
            crypto,
            &[],
            utxo_commitments,
            &kernel_commits,
            total_offset,
            total_supply,
        )
    }

    /// Validate one block's body given the cumulative offset of the
    /// previous header.
    pub fn validate_for_block(
        crypto: &dyn Crypto,
        body: &TxBody,
        total_offset: &BlindingFactor,
        prev_total_offset: &BlindingFactor,
    ) -> Result<(), ChainStateError> {
        let block_offset = if prev_total_offset.is_zero() {
            *total_offset
        } else {
            crypto.add_blinding_factors(&[*total_offset], &[*prev_total_offset])?
        };

        validate_sums(
            crypto,
            &body.input_commits(),
            &body.output_commits(),
            &body.kernel_commits(),
            &block_offset,
            body.supply_change(),
        )
    }

    pub fn validate_for_tx(
        crypto: &dyn Crypto,
        transaction: &Transaction,
    ) -> Result<(), ChainStateError> {
        validate_sums(
            crypto,
            &transaction.body().input_commits(),
            &transaction.body().output_commits(),
            &transaction.body().kernel_commits(),
            transaction.kernel_offset(),
            transaction.supply_change(),
        )
    }

    fn validate_sums(
        crypto: &dyn Crypto,
        input_commits: &[Commitment],
        output_commits: &[Commitment],
        kernel_commits: &[Commitment],
        offset: &BlindingFactor,
        coins_added: Amount,
    ) -> Result<(), ChainStateError> {
        // Outputs minus inputs, with the public supply change removed so
        // only blinding factors remain.
        let mut sum_utxo_commitment = crypto.add_commitments(output_commits, input_commits)?;
        if coins_added > 0 {
            let transparent = crypto.commit_transparent(coins_added as u64)?;
            sum_utxo_commitment =
                crypto.add_commitments(&[sum_utxo_commitment], &[transparent])?;
        } else if coins_added < 0 {
            let transparent = crypto.commit_transparent(coins_added.unsigned_abs())?;
            sum_utxo_commitment =
                crypto.add_commitments(&[sum_utxo_commitment, transparent], &[])?;
        }

        let mut sum_excess_commitment = crypto.add_commitments(kernel_commits, &[])?;
        if !offset.is_zero() {
            let offset_commitment = crypto.commit_blinded(0, offset)?;
            sum_excess_commitment =
                crypto.add_commitments(&[sum_excess_commitment, offset_commitment], &[])?;
        }

        if sum_utxo_commitment != sum_excess_commitment {
            log_error!(
                "utxo sum {sum_utxo_commitment} does not match kernel excess sum {sum_excess_commitment}"
            );
            return Err(ConsensusError::BlockSums.into());
        }

        Ok(())
    }
}

/// The owner balance equation: input pubkeys plus owner-signature
/// pubkeys plus the owner offset's pubkey must equal the output sender
/// pubkeys.
pub mod owner_sums {
    use super::*;

    pub fn validate(
        crypto: &dyn Crypto,
        owner_offset: &BlindingFactor,
        body: &TxBody,
    ) -> Result<(), ChainStateError> {
        let output_pubkeys: Vec<PublicKey> = body
            .outputs()
            .iter()
            .map(|output| *output.sender_pubkey())
            .collect();

        let mut input_pubkeys: Vec<PublicKey> = body
            .inputs()
            .iter()
            .map(|input| *input.input_pubkey())
            .collect();
        input_pubkeys.extend(body.owner_sigs().iter().map(|sig| sig.public_key));
        if !owner_offset.is_zero() {
            input_pubkeys.push(crypto.public_key_of(owner_offset)?);
        }

        let total_input_pubkey = if input_pubkeys.is_empty() {
            PublicKey::default()
        } else {
            crypto.add_public_keys(&input_pubkeys)?
        };
        let total_output_pubkey = if output_pubkeys.is_empty() {
            PublicKey::default()
        } else {
            crypto.add_public_keys(&output_pubkeys)?
        };

        if total_input_pubkey != total_output_pubkey {
            return Err(ConsensusError::OwnerSums.into());
        }

        Ok(())
    }
}

/// Full context-free transaction validation: structure, signatures,
/// range proofs, and both balance equations.
pub fn validate_transaction(
    crypto: &dyn Crypto,
    transaction: &Transaction,
) -> Result<(), ChainStateError> {
    transaction.body().validate(crypto)?;
    kernel_sums::validate_for_tx(crypto, transaction)?;
    owner_sums::validate(crypto, transaction.owner_offset(), transaction.body())
}

/// Context-free block validation: the body plus the owner balance
/// against the header's owner offset.
pub fn validate_block(crypto: &dyn Crypto, block: &Block) -> Result<(), ChainStateError> {
    block.body().validate(crypto)?;
    owner_sums::validate(crypto, block.header().owner_offset(), block.body())
}

/// Validates a block against its expected hash and the peg-in/peg-out
/// sets committed on the base chain. Re-validating an already-validated
/// block is a no-op.
pub struct BlockValidator;

impl BlockValidator {
    pub fn validate(
        crypto: &dyn Crypto,
        block: &Block,
        mweb_hash: &Hash256,
        pegin_coins: &[PegInCoin],
        pegout_coins: &[PegOutCoin],
    ) -> Result<(), ChainStateError> {
        if block.was_validated() {
            return Ok(());
        }

        if block.hash() != mweb_hash {
            return Err(ConsensusError::HashMismatch.into());
        }

        validate_block(crypto, block)?;

        Self::validate_pegin_coins(block, pegin_coins)?;
        Self::validate_pegout_coins(block, pegout_coins)?;

        block.mark_as_validated();
        Ok(())
    }

    fn validate_pegin_coins(
        block: &Block,
        pegin_coins: &[PegInCoin],
    ) -> Result<(), ChainStateError> {
        let expected: HashMap<Commitment, Amount> = pegin_coins
            .iter()
            .map(|coin| (coin.commitment, coin.amount))
            .collect();

        let block_pegins = block.pegins();
        if block_pegins.len() != expected.len() {
            return Err(ConsensusError::PeginMismatch.into());
        }

        for pegin in &block_pegins {
            match expected.get(&pegin.commitment) {
                Some(amount) if *amount == pegin.amount => {}
                _ => return Err(ConsensusError::PeginMismatch.into()),
            }
        }

        Ok(())
    }

    fn validate_pegout_coins(
        block: &Block,
        pegout_coins: &[PegOutCoin],
    ) -> Result<(), ChainStateError> {
        let expected: HashMap<&[u8], Amount> = pegout_coins
            .iter()
            .map(|coin| (coin.script_pubkey.as_slice(), coin.amount))
            .collect();

        let block_pegouts = block.pegouts();
        if block_pegouts.len() != expected.len() {
            return Err(ConsensusError::PegoutMismatch.into());
        }

        for pegout in &block_pegouts {
            match expected.get(pegout.script_pubkey.as_slice()) {
                Some(amount) if *amount == pegout.amount => {}
                _ => return Err(ConsensusError::PegoutMismatch.into()),
            }
        }

        Ok(())
    }
}

/// Walk every unspent output leaf and every kernel leaf in a view and
/// re-run the full-state balance validation.
pub fn validate_view_state(
    crypto: &dyn Crypto,
    leafset: &SharedLeafSet,
    kernel_mmr: &SharedMmr,
    output_mmr: &SharedMmr,
    best_header: Option<&Header>,
) -> Result<(), ChainStateError> {
    let leafset = leafset.read().expect("leafset lock");
    let kernel_mmr = kernel_mmr.read().expect("mmr lock");
    let output_mmr = output_mmr.read().expect("mmr lock");

    let mut utxo_commitments = Vec::new();
    for i in 0..output_mmr.num_leaves() {
        let index = LeafIndex::at(i);
        if leafset.contains(&index) {
            let leaf = output_mmr.leaf(&index)?;
            let output_id: OutputId = mweb_primitives::encoding::decode(leaf.data())?;
            utxo_commitments.push(*output_id.commitment());
        }
    }

    let mut kernels = Vec::new();
    for i in 0..kernel_mmr.num_leaves() {
        let leaf = kernel_mmr.leaf(&LeafIndex::at(i))?;
        kernels.push(mweb_primitives::encoding::decode::<Kernel>(leaf.data())?);
    }

    let total_offset = best_header
        .map(|header| *header.kernel_offset())
        .unwrap_or(BlindingFactor::ZERO);

    kernel_sums::validate_state(crypto, &utxo_commitments, &kernels, &total_offset)
}

/// Height-aware input availability check used on the mempool path:
/// every input must be a live coin, and pegged-in outputs may not be
/// spent before they mature.
pub fn check_tx_inputs(
    view: &View,
    transaction: &Transaction,
    spend_height: u64,
) -> Result<(), ChainStateError> {
    for input in transaction.inputs() {
        let utxos = view.get_utxos(input.commitment())?;
        let utxo = match utxos.last() {
            Some(utxo) => utxo,
            None => return Err(ConsensusError::UtxoMissing.into()),
        };

        if utxo.is_pegged_in() && spend_height < utxo.block_height() + PEGIN_MATURITY {
            return Err(ConsensusError::PeginMaturity.into());
        }
    }

    Ok(())
}
