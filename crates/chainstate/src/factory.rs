//! Bootstrap a durable view from a compact state snapshot, and build
//! such snapshots from an existing view.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use mweb_consensus::{ConsensusError, Hash256};
use mweb_crypto::{Commitment, CryptoCtx, SignedMessage};
use mweb_log::log_info;
use mweb_mmr::backend::FileBackend;
use mweb_mmr::{
    factory as mmr_factory, util, BitSet, LeafIndex, LeafSet, LeafSetOps, Mmr, MmrOps,
    PruneList,
};
use mweb_primitives::block::Header;
use mweb_primitives::encoding::{decode, encode};
use mweb_primitives::kernel::Kernel;
use mweb_primitives::transaction::OutputId;
use mweb_storage::{Column, KeyValueStore, WriteBatch};

use crate::chain::Chain;
use crate::db::DbView;
use crate::mmr_info::MmrInfo;
use crate::utxo::{CoinStore, Utxo};
use crate::validation::kernel_sums;
use crate::view::View;
use crate::ChainStateError;

const KERNEL_SIG_BATCH_SIZE: usize = 512;

/// A compact, verifiable state snapshot: everything a peer needs to
/// rebuild the full authenticated state at one header.
#[derive(Clone, Debug)]
pub struct StateSnapshot {
    pub header: Arc<Header>,
    pub utxos: Vec<Arc<Utxo>>,
    pub kernels: Vec<Kernel>,
    pub leafset: BitSet,
    pub pruned_parent_hashes: Vec<Hash256>,
}

/// Capture the snapshot of a view's current state.
pub fn snapshot(view: &View) -> Result<StateSnapshot, ChainStateError> {
    let header = view
        .best_header()
        .ok_or(ChainStateError::InvalidState("snapshot of headerless view"))?;

    let kernel_mmr = view.kernel_mmr();
    let kernel_mmr = kernel_mmr.read().expect("mmr lock");
    let mut kernels = Vec::with_capacity(kernel_mmr.num_leaves() as usize);
    for i in 0..kernel_mmr.num_leaves() {
        let leaf = kernel_mmr.leaf(&LeafIndex::at(i))?;
        kernels.push(decode::<Kernel>(leaf.data())?);
    }

    let leafset_bits = view.leafset().read().expect("leafset lock").to_bitset();

    let output_mmr = view.output_mmr();
    let output_mmr = output_mmr.read().expect("mmr lock");
    let mut utxos = Vec::with_capacity(leafset_bits.count() as usize);
    for i in 0..output_mmr.num_leaves() {
        if leafset_bits.test(i) {
            let leaf = output_mmr.leaf(&LeafIndex::at(i))?;
            let output_id: OutputId = decode(leaf.data())?;
            let mut found = view.get_utxos(output_id.commitment())?;
            match found.pop() {
                Some(utxo) => utxos.push(utxo),
                None => {
                    return Err(ChainStateError::InvalidState(
                        "unspent leaf missing from utxo store",
                    ))
                }
            }
        }
    }

    let retained = util::calc_pruned_parents(&leafset_bits);
    let mut pruned_parent_hashes = Vec::new();
    for position in 0..retained.len() {
        if retained.test(position) {
            pruned_parent_hashes.push(output_mmr.hash_at(&mweb_mmr::Index::at(position))?);
        }
    }

    Ok(StateSnapshot {
        header,
        utxos,
        kernels,
        leafset: leafset_bits,
        pruned_parent_hashes,
    })
}

/// Rebuild a durable view from a snapshot, validating every commitment
/// along the way: the LeafSet root, the kernel MMR root at every
/// historical header, all kernel signatures, the output MMR root, and
/// the global balance equation.
pub fn create_db_view(
    store: Arc<dyn KeyValueStore>,
    crypto: CryptoCtx,
    chain: &dyn Chain,
    datadir: &Path,
    state: &StateSnapshot,
) -> Result<DbView, ChainStateError> {
    if state.kernels.len() as u64 != state.header.num_kernels() {
        return Err(ConsensusError::MmrMismatch.into());
    }

    // Advance the generation record up front; the previous generation's
    // files are left untouched.
    let mut mmr_info = MmrInfo::load(&*store)?.unwrap_or_default();
    mmr_info.index += 1;
    mmr_info.pruned = *state.header.hash();
    mmr_info.compact_index += 1;
    mmr_info.compacted = Some(*state.header.hash());
    let mut info_batch = WriteBatch::new();
    mmr_info.save(&mut info_batch);
    store.write_batch(&info_batch)?;

    // LeafSet generation.
    let mut leafset = LeafSet::open(datadir, mmr_info.index)?;
    for leaf in 0..state.leafset.len() {
        if state.leafset.test(leaf) {
            leafset.add(&LeafIndex::at(leaf));
        } else {
            leafset.remove(&LeafIndex::at(leaf));
        }
    }
    leafset.rewind(state.leafset.len(), &[]);
    leafset.flush(mmr_info.index)?;
    if leafset.root() != *state.header.leafset_root() {
        return Err(ConsensusError::MmrMismatch.into());
    }

    // PruneList from the compact bitset of the snapshot.
    let compact_bitset = util::build_compact_bitset(state.header.num_txos(), &state.leafset);
    let prune_list = PruneList::from_bitset(compact_bitset);
    prune_list.flush(datadir, mmr_info.compact_index)?;
    let prune_list = Arc::new(prune_list);

    let mut batch = WriteBatch::new();

    let kernel_mmr = build_and_validate_kernel_mmr(
        Arc::clone(&store),
        &crypto,
        &mut batch,
        &mmr_info,
        chain,
        datadir,
        state,
    )?;

    let output_mmr = build_and_validate_output_mmr(
        Arc::clone(&store),
        &mut batch,
        &mmr_info,
        datadir,
        state,
        Arc::clone(&prune_list),
    )?;

    // Global balance.
    let utxo_commitments: Vec<Commitment> =
        state.utxos.iter().map(|utxo| *utxo.commitment()).collect();
    kernel_sums::validate_state(
        &*crypto,
        &utxo_commitments,
        &state.kernels,
        state.header.kernel_offset(),
    )?;

    // UTXO store, grouped by commitment with duplicates kept in order.
    let coin_store = CoinStore::new(&*store);
    let mut by_commitment: HashMap<Commitment, Vec<Arc<Utxo>>> = HashMap::new();
    for utxo in &state.utxos {
        by_commitment
            .entry(*utxo.commitment())
            .or_default()
            .push(Arc::clone(utxo));
    }
    for (commitment, utxos) in &by_commitment {
        coin_store.write_utxos(&mut batch, commitment, utxos);
    }

    store.write_batch(&batch)?;

    log_info!(
        "rebuilt state at height {} with {} utxos and {} kernels",
        state.header.height(),
        state.utxos.len(),
        state.kernels.len()
    );

    Ok(DbView::from_parts(
        Some(Arc::clone(&state.header)),
        store,
        crypto,
        datadir,
        leafset,
        kernel_mmr,
        output_mmr,
    ))
}

fn build_and_validate_kernel_mmr(
    store: Arc<dyn KeyValueStore>,
    crypto: &CryptoCtx,
    batch: &mut WriteBatch,
    mmr_info: &MmrInfo,
    chain: &dyn Chain,
    datadir: &Path,
    state: &StateSnapshot,
) -> Result<Mmr<FileBackend>, ChainStateError> {
    let backend = FileBackend::open(
        Column::KernelLeaf,
        'K',
        datadir,
        mmr_info.index,
        Arc::clone(&store),
        None,
    )?;
    let mut mmr = Mmr::new(backend);

    // Replay kernels against the historical headers: every header's
    // kernel root must appear at the matching kernel count.
    let mut iter = chain.new_iterator();
    let mut kernels_added = 0u64;
    for kernel in &state.kernels {
        if !iter.valid() {
            return Err(ConsensusError::MmrMismatch.into());
        }

        mmr.add_leaf(encode(kernel))?;
        kernels_added += 1;

        // Loop because some blocks add no kernels.
        while let Some(header) = iter.header().cloned() {
            if kernels_added != header.num_kernels() {
                break;
            }
            if *header.kernel_root() != mmr.root()? {
                return Err(ConsensusError::MmrMismatch.into());
            }
            if header.hash() == state.header.hash() {
                break;
            }
            iter.next();
        }
    }

    mmr.commit_backend(mmr_info.index, batch)?;

    // Kernel signatures, verified in batches.
    let mut signatures = Vec::with_capacity(KERNEL_SIG_BATCH_SIZE);
    for kernel in &state.kernels {
        let public_key = crypto.to_public_key(kernel.commitment())?;
        signatures.push(SignedMessage::new(
            kernel.signature_message(),
            public_key,
            *kernel.signature(),
        ));

        if signatures.len() >= KERNEL_SIG_BATCH_SIZE {
            if !crypto.batch_verify(&signatures) {
                return Err(ConsensusError::InvalidSig.into());
            }
            signatures.clear();
        }
    }
    if !signatures.is_empty() && !crypto.batch_verify(&signatures) {
        return Err(ConsensusError::InvalidSig.into());
    }

    Ok(mmr)
}

fn build_and_validate_output_mmr(
    store: Arc<dyn KeyValueStore>,
    batch: &mut WriteBatch,
    mmr_info: &MmrInfo,
    datadir: &Path,
    state: &StateSnapshot,
    prune_list: Arc<PruneList>,
) -> Result<Mmr<FileBackend>, ChainStateError> {
    if state.leafset.count() != state.utxos.len() as u64 {
        return Err(ConsensusError::MmrMismatch.into());
    }

    let mut output_leaves = Vec::with_capacity(state.utxos.len());
    let mut utxo_idx = 0usize;
    for leaf in 0..state.leafset.len() {
        if state.leafset.test(leaf) {
            let utxo = &state.utxos[utxo_idx];
            utxo_idx += 1;
            output_leaves.push(mweb_mmr::Leaf::create(
                LeafIndex::at(leaf),
                encode(&utxo.to_output_id()),
            ));
        }
    }

    let output_mmr = mmr_factory::build(
        Column::OutputLeaf,
        'O',
        datadir,
        mmr_info.index,
        store,
        batch,
        Some(prune_list),
        &state.leafset,
        output_leaves,
        &state.pruned_parent_hashes,
    )?;

    if output_mmr.root()? != *state.header.output_root()
        || output_mmr.num_leaves() != state.header.num_txos()
    {
        return Err(ConsensusError::MmrMismatch.into());
    }

    Ok(output_mmr)
}
