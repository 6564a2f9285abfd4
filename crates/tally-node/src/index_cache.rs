//! In-memory block index with dirty tracking.
//!
//! [`IndexCache`] is the node-side half of the block tree: it holds the
//! loaded [`BlockIndexMap`], remembers which nodes and block files changed
//! since the last flush, and writes them back with a single
//! [`BlockTreeDb::write_batch_sync`]. Callers share it behind one lock as a
//! [`SharedIndex`], which also serializes every store mutation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use tally_core::block_index::{BlockIndexMap, BlockIndexRecord, BlockValidity, NodeId, NodeStateMut};
use tally_core::constants::ConsensusParams;
use tally_core::error::IndexError;
use tally_core::pow::check_proof_of_work;
use tally_core::types::{BlockFileInfo, BlockHeader};

use crate::block_tree::{BlockTreeDb, LoadStats};
use crate::storage::KeyValueStore;

/// An [`IndexCache`] shared between threads.
pub type SharedIndex<S> = Arc<Mutex<IndexCache<S>>>;

/// Loaded block index plus the changes not yet written back.
pub struct IndexCache<S> {
    db: BlockTreeDb<S>,
    params: ConsensusParams,
    map: BlockIndexMap,
    dirty_blocks: BTreeSet<NodeId>,
    file_infos: BTreeMap<i32, BlockFileInfo>,
    dirty_files: BTreeSet<i32>,
    last_file: i32,
    reindexing: bool,
    load_stats: LoadStats,
}

impl<S: KeyValueStore> IndexCache<S> {
    /// Open the cache over `db`.
    ///
    /// When the reindex marker is set the block index is not loaded; the map
    /// starts empty and is rebuilt by the caller from the block files.
    /// Otherwise every stored record is loaded and checked against `params`.
    pub fn open(db: BlockTreeDb<S>, params: ConsensusParams) -> Result<Self, IndexError> {
        let reindexing = db.read_reindexing()?;
        let mut map = BlockIndexMap::new();
        let load_stats = if reindexing {
            warn!("reindex marker set, skipping block index load");
            LoadStats::default()
        } else {
            db.load_block_index_guts(&mut map, &params)?
        };

        let last_file = db.read_last_block_file()?.unwrap_or(0);
        let file_infos = db.read_block_file_infos()?;
        info!(
            nodes = map.len(),
            files = file_infos.len(),
            last_file,
            reindexing,
            "block index cache ready"
        );

        Ok(Self {
            db,
            params,
            map,
            dirty_blocks: BTreeSet::new(),
            file_infos,
            dirty_files: BTreeSet::new(),
            last_file,
            reindexing,
            load_stats,
        })
    }

    /// Wrap the cache for sharing.
    pub fn shared(self) -> SharedIndex<S> {
        Arc::new(Mutex::new(self))
    }

    pub fn index(&self) -> &BlockIndexMap {
        &self.map
    }

    pub fn db(&self) -> &BlockTreeDb<S> {
        &self.db
    }

    /// Give back the underlying database, dropping unflushed changes.
    pub fn into_db(self) -> BlockTreeDb<S> {
        self.db
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn is_reindexing(&self) -> bool {
        self.reindexing
    }

    pub fn load_stats(&self) -> LoadStats {
        self.load_stats
    }

    pub fn last_file(&self) -> i32 {
        self.last_file
    }

    pub fn file_info(&self, file: i32) -> Option<&BlockFileInfo> {
        self.file_infos.get(&file)
    }

    /// Nodes changed since the last flush.
    pub fn dirty_blocks(&self) -> usize {
        self.dirty_blocks.len()
    }

    pub fn dirty_files(&self) -> usize {
        self.dirty_files.len()
    }

    /// Add a header to the index and return its node.
    ///
    /// A header already present returns the existing node untouched. A new
    /// header must pass proof of work and extend a known block (or be a
    /// genesis header); otherwise `None` is returned and nothing changes.
    /// New nodes start at [`BlockValidity::Tree`] with no transactions.
    pub fn add_header(&mut self, header: BlockHeader) -> Option<NodeId> {
        let hash = header.hash();
        if let Some(id) = self.map.lookup(&hash) {
            if self.map[id].header == header {
                return Some(id);
            }
        }
        if !check_proof_of_work(&hash, header.bits, &self.params) {
            warn!(%hash, bits = header.bits, "rejected header failing proof of work");
            return None;
        }

        let height = if header.prev_hash.is_zero() {
            0
        } else {
            let parent = self.map.by_hash(&header.prev_hash)?;
            if parent.header.hash() != parent.hash {
                return None;
            }
            parent.height + 1
        };

        let mut record = BlockIndexRecord::new(header, height);
        record.status.raise_validity(BlockValidity::Tree);
        let id = self.map.upsert_record(&record)?;
        self.dirty_blocks.insert(id);
        debug!(%hash, height, "added header to block index");
        Some(id)
    }

    /// Change one node's storage and validation state and mark it for the
    /// next flush.
    ///
    /// Returns `false` if `id` is not in the index.
    pub fn update(&mut self, id: NodeId, f: impl FnOnce(NodeStateMut<'_>)) -> bool {
        match self.map.state_mut(id) {
            Some(state) => {
                f(state);
                self.dirty_blocks.insert(id);
                true
            }
            None => false,
        }
    }

    /// Account for a block of `size` bytes written to block file `file`.
    pub fn record_block_file(&mut self, file: i32, height: i32, time: u64, size: u32) {
        self.file_infos
            .entry(file)
            .or_default()
            .add_block(height, time, size);
        self.dirty_files.insert(file);
        if file > self.last_file {
            self.last_file = file;
        }
    }

    /// Write every dirty node with transactions and every dirty file info in
    /// one batch. Returns the number of block records written.
    ///
    /// Nodes without transactions stay dirty: a stored record needs a
    /// transaction count, and the loader erases any record without one.
    /// Dirty sets are only cleared once the batch has committed.
    pub fn flush(&mut self, durable: bool) -> Result<usize, IndexError> {
        let flushed: Vec<NodeId> = self
            .dirty_blocks
            .iter()
            .copied()
            .filter(|id| self.map.get(*id).is_some_and(|node| node.tx_count > 0))
            .collect();
        if flushed.is_empty() && self.dirty_files.is_empty() {
            return Ok(0);
        }

        let records: Vec<BlockIndexRecord> =
            flushed.iter().map(|id| self.map[*id].to_record()).collect();
        let refs: Vec<&BlockIndexRecord> = records.iter().collect();
        let files: Vec<(i32, BlockFileInfo)> = self
            .dirty_files
            .iter()
            .filter_map(|file| self.file_infos.get(file).map(|info| (*file, *info)))
            .collect();

        self.db
            .write_batch_sync(&files, self.last_file, &refs, durable)?;

        for id in &flushed {
            self.dirty_blocks.remove(id);
        }
        self.dirty_files.clear();
        info!(
            blocks = records.len(),
            files = files.len(),
            pending = self.dirty_blocks.len(),
            "flushed block index"
        );
        Ok(records.len())
    }
}
