//! The block tree database: persisted block index plus its side tables.
//!
//! [`BlockTreeDb`] owns a [`KeyValueStore`] and knows the keyspace from
//! [`crate::schema`]. It writes block index records, file info, and the
//! last-file counter in one atomic batch, rebuilds the in-memory
//! [`BlockIndexMap`] at startup, and reads and writes the auxiliary records
//! (file counters, reindex marker, named flags, transaction index).
//!
//! Missing records are `Ok(None)`. Records that exist but cannot be decoded
//! are [`CorruptionError`]s; nothing here panics on stored bytes.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use tally_core::block_index::{BlockIndexMap, BlockIndexRecord};
use tally_core::codec::{decode_exact, encode_to_vec, Decodable};
use tally_core::constants::ConsensusParams;
use tally_core::error::{CorruptionError, IndexError};
use tally_core::pow::check_proof_of_work;
use tally_core::types::{BlockFileInfo, DiskTxPos, Hash256};

use crate::schema::{self, DB_BLOCK_FILES, DB_BLOCK_INDEX, FLAG_FALSE, FLAG_TRUE, MAX_BLOCK_FILE_UNSET, REINDEX_MARKER};
use crate::storage::{KeyValueStore, KvCursor, RocksStore, StoreOptions, WriteBatch};

/// Outcome of [`BlockTreeDb::load_block_index_guts`].
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Block index records attached to the DAG.
    pub loaded: usize,
    /// Records with no transactions that were erased from the store.
    pub pruned: usize,
    /// Nodes in the map with no transaction data, typically parents that
    /// were referenced but never stored.
    pub stubs: usize,
}

/// Persistent block index over a key-value store.
pub struct BlockTreeDb<S> {
    store: S,
}

impl BlockTreeDb<RocksStore> {
    /// Open the RocksDB-backed block tree at `path`.
    pub fn open(path: impl AsRef<Path>, options: &StoreOptions) -> Result<Self, IndexError> {
        Ok(Self::new(RocksStore::open(path, options)?))
    }
}

impl<S: KeyValueStore> BlockTreeDb<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // --- Batch writer ---

    /// Write file info, the last file id, and block index records in one
    /// atomic batch.
    ///
    /// Each file info is stored under its own file id. On failure nothing
    /// from the batch is applied and the store error is returned unchanged.
    pub fn write_batch_sync(
        &self,
        file_infos: &[(i32, BlockFileInfo)],
        last_file: i32,
        block_indexes: &[&BlockIndexRecord],
        durable: bool,
    ) -> Result<(), IndexError> {
        let mut batch = WriteBatch::new();
        for (file, info) in file_infos {
            batch.put(schema::file_info_key(*file), encode_to_vec(info));
        }
        batch.put(schema::last_block_file_key(), encode_to_vec(&last_file));
        for record in block_indexes {
            batch.put(schema::block_index_key(&record.hash), encode_to_vec(*record));
        }

        let ops = batch.len();
        if let Err(e) = self.store.commit_batch(batch, durable) {
            error!(
                files = file_infos.len(),
                blocks = block_indexes.len(),
                last_file,
                "block index batch commit failed: {e}"
            );
            return Err(e);
        }
        debug!(
            files = file_infos.len(),
            blocks = block_indexes.len(),
            last_file,
            ops,
            durable,
            "committed block index batch"
        );
        Ok(())
    }

    // --- Loader ---

    /// Rebuild the block DAG from every stored block index record.
    ///
    /// Records are visited in key order, which is unrelated to chain order:
    /// a child may arrive before its parent, in which case the parent is
    /// created as a stub and filled in when its own record is reached.
    /// Records with `tx_count == 0` are erased from the store and skipped.
    /// Each record's hash must match its key and pass proof of work under
    /// `params`.
    ///
    /// The map is only modified when the whole load succeeds.
    pub fn load_block_index_guts(
        &self,
        map: &mut BlockIndexMap,
        params: &ConsensusParams,
    ) -> Result<LoadStats, IndexError> {
        let mut scratch = map.clone();
        let mut stats = LoadStats::default();

        let mut cursor = self.store.cursor();
        cursor.seek(&[DB_BLOCK_INDEX]);
        while cursor.valid() {
            let (Some(key), Some(value)) = (cursor.key(), cursor.value()) else {
                break;
            };
            if key.first() != Some(&DB_BLOCK_INDEX) {
                break;
            }

            let record = match Self::decode_block_index(key, value) {
                Ok(record) => record,
                Err(e) => {
                    error!("block index load aborted: {e}");
                    return Err(e.into());
                }
            };

            if record.tx_count == 0 {
                let key = key.to_vec();
                warn!(hash = %record.hash, height = record.height, "erasing block index record with no transactions");
                self.store.delete(&key, true)?;
                stats.pruned += 1;
                cursor.next();
                continue;
            }

            scratch.upsert_record(&record);

            if !check_proof_of_work(&record.hash, record.header.bits, params) {
                let err = CorruptionError::ProofOfWork {
                    hash: record.hash.to_string(),
                    bits: record.header.bits,
                };
                error!(height = record.height, "block index load aborted: {err}");
                return Err(err.into());
            }

            stats.loaded += 1;
            cursor.next();
        }
        cursor.status()?;

        stats.stubs = scratch.iter().filter(|(_, node)| node.tx_count == 0).count();
        *map = scratch;

        info!(
            loaded = stats.loaded,
            pruned = stats.pruned,
            stubs = stats.stubs,
            nodes = map.len(),
            network = %params.network,
            "loaded block index"
        );
        Ok(stats)
    }

    fn decode_block_index(key: &[u8], value: &[u8]) -> Result<BlockIndexRecord, CorruptionError> {
        let hash = schema::parse_block_index_key(key)?;
        let record: BlockIndexRecord =
            decode_exact(value).map_err(|source| CorruptionError::Decode {
                key: schema::display_key(key),
                source,
            })?;
        if record.hash != hash {
            return Err(CorruptionError::HashMismatch {
                key: schema::display_key(key),
                hash: record.hash.to_string(),
            });
        }
        Ok(record)
    }

    /// Read a single block index record.
    pub fn read_block_index(&self, hash: &Hash256) -> Result<Option<BlockIndexRecord>, IndexError> {
        let key = schema::block_index_key(hash);
        match self.store.get(&key)? {
            Some(value) => Ok(Some(Self::decode_block_index(&key, &value)?)),
            None => Ok(None),
        }
    }

    // --- Block files ---

    pub fn read_block_file_info(&self, file: i32) -> Result<Option<BlockFileInfo>, IndexError> {
        self.read_value(&schema::file_info_key(file))
    }

    /// Every stored block file info, keyed by file id.
    ///
    /// Scans the file info table instead of probing ids, so a damaged
    /// last-file counter cannot make this walk a huge id range.
    pub fn read_block_file_infos(&self) -> Result<BTreeMap<i32, BlockFileInfo>, IndexError> {
        let mut infos = BTreeMap::new();
        let mut cursor = self.store.cursor();
        cursor.seek(&[DB_BLOCK_FILES]);
        while cursor.valid() {
            let (Some(key), Some(value)) = (cursor.key(), cursor.value()) else {
                break;
            };
            if key.first() != Some(&DB_BLOCK_FILES) {
                break;
            }
            let file = schema::parse_file_info_key(key)?;
            let info = decode_exact(value).map_err(|source| CorruptionError::Decode {
                key: schema::display_key(key),
                source,
            })?;
            infos.insert(file, info);
            cursor.next();
        }
        cursor.status()?;
        Ok(infos)
    }

    pub fn read_last_block_file(&self) -> Result<Option<i32>, IndexError> {
        self.read_value(&schema::last_block_file_key())
    }

    /// Set the last block file id outside of a batch, as a reindex does.
    pub fn write_last_block_file(&self, file: i32) -> Result<(), IndexError> {
        self.store
            .put(&schema::last_block_file_key(), &encode_to_vec(&file), false)
    }

    /// Highest block file id ever allocated, or [`MAX_BLOCK_FILE_UNSET`].
    pub fn read_max_block_file(&self) -> Result<i32, IndexError> {
        Ok(self
            .read_value(&schema::max_block_file_key())?
            .unwrap_or(MAX_BLOCK_FILE_UNSET))
    }

    pub fn write_max_block_file(&self, file: i32) -> Result<(), IndexError> {
        self.store
            .put(&schema::max_block_file_key(), &encode_to_vec(&file), false)
    }

    // --- Reindex marker ---

    /// Set or clear the marker that forces a reindex on next startup.
    pub fn write_reindexing(&self, reindexing: bool) -> Result<(), IndexError> {
        info!(reindexing, "updating reindex marker");
        if reindexing {
            self.store.put(&schema::reindex_key(), REINDEX_MARKER, true)
        } else {
            self.store.delete(&schema::reindex_key(), true)
        }
    }

    pub fn read_reindexing(&self) -> Result<bool, IndexError> {
        self.store.exists(&schema::reindex_key())
    }

    // --- Named flags ---

    pub fn write_flag(&self, name: &str, value: bool) -> Result<(), IndexError> {
        let byte = if value { FLAG_TRUE } else { FLAG_FALSE };
        self.store.put(&schema::flag_key(name), &[byte], true)
    }

    /// Read a named flag. Unset flags and unrecognised values read as `None`.
    pub fn read_flag(&self, name: &str) -> Result<Option<bool>, IndexError> {
        let Some(value) = self.store.get(&schema::flag_key(name))? else {
            return Ok(None);
        };
        match value.as_slice() {
            [FLAG_TRUE] => Ok(Some(true)),
            [FLAG_FALSE] => Ok(Some(false)),
            other => {
                warn!(flag = name, value = %hex::encode(other), "ignoring unrecognised flag value");
                Ok(None)
            }
        }
    }

    // --- Transaction index ---

    /// Store transaction positions as one buffered batch. Later entries for
    /// the same txid overwrite earlier ones.
    pub fn write_tx_index(&self, entries: &[(Hash256, DiskTxPos)]) -> Result<(), IndexError> {
        let mut batch = WriteBatch::new();
        for (txid, pos) in entries {
            batch.put(schema::tx_index_key(txid), encode_to_vec(pos));
        }
        self.store.commit_batch(batch, false)?;
        debug!(entries = entries.len(), "wrote tx index entries");
        Ok(())
    }

    pub fn read_tx_index(&self, txid: &Hash256) -> Result<Option<DiskTxPos>, IndexError> {
        self.read_value(&schema::tx_index_key(txid))
    }

    // --- Internal helpers ---

    fn read_value<T: Decodable>(&self, key: &[u8]) -> Result<Option<T>, IndexError> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };
        match decode_exact(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(source) => {
                let err = CorruptionError::Decode {
                    key: schema::display_key(key),
                    source,
                };
                error!("{err}");
                Err(err.into())
            }
        }
    }
}
