//! The durable, database- and file-backed view.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use mweb_consensus::ConsensusError;
use mweb_crypto::{Commitment, CryptoCtx};
use mweb_log::{log_debug, log_trace};
use mweb_mmr::backend::FileBackend;
use mweb_mmr::{LeafSet, Mmr, PruneList, SharedLeafSet, SharedMmr};
use mweb_primitives::block::Header;
use mweb_storage::{Column, KeyValueStore, WriteBatch};

use crate::mmr_info::MmrInfo;
use crate::utxo::{CoinStore, Utxo};
use crate::view::{CoinAction, CoinsViewUpdates};
use crate::ChainStateError;

pub struct DbView {
    header: Option<Arc<Header>>,
    store: Arc<dyn KeyValueStore>,
    crypto: CryptoCtx,
    datadir: PathBuf,
    leafset: Arc<RwLock<LeafSet>>,
    kernel_mmr: Arc<RwLock<Mmr<FileBackend>>>,
    output_mmr: Arc<RwLock<Mmr<FileBackend>>>,
}

impl std::fmt::Debug for DbView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbView")
            .field("header", &self.header)
            .field("datadir", &self.datadir)
            .finish_non_exhaustive()
    }
}

impl DbView {
    /// Open the current state: generation numbers come from the
    /// persisted MMR-info record (zero when starting fresh).
    pub fn open(
        datadir: &Path,
        store: Arc<dyn KeyValueStore>,
        crypto: CryptoCtx,
        best_header: Option<Arc<Header>>,
    ) -> Result<Self, ChainStateError> {
        let mmr_info = MmrInfo::load(&*store)?.unwrap_or_default();

        let leafset = LeafSet::open(datadir, mmr_info.index)?;
        let prune_list = Arc::new(PruneList::open(datadir, mmr_info.compact_index)?);

        let kernel_backend = FileBackend::open(
            Column::KernelLeaf,
            'K',
            datadir,
            mmr_info.index,
            Arc::clone(&store),
            None,
        )?;
        let output_backend = FileBackend::open(
            Column::OutputLeaf,
            'O',
            datadir,
            mmr_info.index,
            Arc::clone(&store),
            Some(prune_list),
        )?;

        Ok(Self {
            header: best_header,
            store,
            crypto,
            datadir: datadir.to_path_buf(),
            leafset: Arc::new(RwLock::new(leafset)),
            kernel_mmr: Arc::new(RwLock::new(Mmr::new(kernel_backend))),
            output_mmr: Arc::new(RwLock::new(Mmr::new(output_backend))),
        })
    }

    pub fn from_parts(
        header: Option<Arc<Header>>,
        store: Arc<dyn KeyValueStore>,
        crypto: CryptoCtx,
        datadir: &Path,
        leafset: LeafSet,
        kernel_mmr: Mmr<FileBackend>,
        output_mmr: Mmr<FileBackend>,
    ) -> Self {
        Self {
            header,
            store,
            crypto,
            datadir: datadir.to_path_buf(),
            leafset: Arc::new(RwLock::new(leafset)),
            kernel_mmr: Arc::new(RwLock::new(kernel_mmr)),
            output_mmr: Arc::new(RwLock::new(output_mmr)),
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
        CoinStore::new(&*self.store).get_utxos(commitment)
    }

    /// Fold the pending actions into per-commitment UTXO lists and emit
    /// the resulting puts/deletes. Actions for one commitment apply in
    /// order against the stored list: adds push, spends pop the most
    /// recent entry.
    pub fn write_batch(
        &mut self,
        batch: &mut WriteBatch,
        updates: &CoinsViewUpdates,
        header: Option<Arc<Header>>,
    ) -> Result<(), ChainStateError> {
        self.header = header;

        let coin_store = CoinStore::new(&*self.store);
        for (commitment, actions) in updates.actions() {
            let mut utxos = coin_store.get_utxos(commitment)?;
            for action in actions {
                match action {
                    CoinAction::Add(utxo) => utxos.push(Arc::clone(utxo)),
                    CoinAction::Spend => {
                        if utxos.pop().is_none() {
                            return Err(ConsensusError::UtxoMissing.into());
                        }
                    }
                }
            }
            coin_store.write_utxos(batch, commitment, &utxos);
        }

        Ok(())
    }

    /// Delete LeafSet/MMR/PruneList generations older than the current
    /// MMR-info record. The live generation files are never touched.
    pub fn compact(&self) -> Result<(), ChainStateError> {
        let mmr_info = match MmrInfo::load(&*self.store)? {
            Some(info) => info,
            None => return Ok(()),
        };

        let entries = match fs::read_dir(&self.datadir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(ChainStateError::Mmr(err.into())),
        };

        let mut removed = 0usize;
        for entry in entries {
            let entry = entry.map_err(|err| ChainStateError::Mmr(err.into()))?;
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(name) => name,
                None => continue,
            };

            if let Some(generation) = parse_generation(name) {
                let stale = match generation.kind {
                    GenerationKind::PruneList => generation.index < mmr_info.compact_index,
                    _ => generation.index < mmr_info.index,
                };
                if stale {
                    log_trace!("compacting stale generation file {name}");
                    fs::remove_file(entry.path())
                        .map_err(|err| ChainStateError::Mmr(err.into()))?;
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            log_debug!("removed {removed} stale generation files");
        }
        Ok(())
    }
}

#[derive(Debug, Eq, PartialEq)]
enum GenerationKind {
    LeafSet,
    KernelMmr,
    OutputMmr,
    PruneList,
}

struct GenerationFile {
    kind: GenerationKind,
    index: u32,
}

fn parse_generation(name: &str) -> Option<GenerationFile> {
    let stem = name.strip_suffix(".dat")?;
    let (kind, digits) = if let Some(digits) = stem.strip_prefix("leaf") {
        (GenerationKind::LeafSet, digits)
    } else if let Some(digits) = stem.strip_prefix("prun") {
        (GenerationKind::PruneList, digits)
    } else if let Some(digits) = stem.strip_prefix('K') {
        (GenerationKind::KernelMmr, digits)
    } else if let Some(digits) = stem.strip_prefix('O') {
        (GenerationKind::OutputMmr, digits)
    } else {
        return None;
    };

    if digits.len() != 6 {
        return None;
    }
    let index = digits.parse().ok()?;
    Some(GenerationFile { kind, index })
}
