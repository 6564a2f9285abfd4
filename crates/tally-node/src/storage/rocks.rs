//! RocksDB-backed [`KeyValueStore`].
//!
//! The block index lives in the default column family; tables are told
//! apart by a one-byte key prefix (see [`crate::schema`]). Durable writes
//! set `sync` on the write options so they are fsynced before returning.

use std::path::Path;

use rocksdb::{BlockBasedOptions, Cache, DBRawIterator, Options, WriteOptions, DB};
use serde::{Deserialize, Serialize};
use tally_core::error::IndexError;

use super::{BatchOp, KeyValueStore, KvCursor, WriteBatch};

/// Tuning knobs for opening a [`RocksStore`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StoreOptions {
    /// Create the database if the directory is empty.
    pub create_if_missing: bool,
    /// Block cache size in MiB.
    pub cache_size_mb: usize,
    /// Maximum number of open table files; `-1` keeps every file open.
    pub max_open_files: i32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            cache_size_mb: 8,
            max_open_files: 64,
        }
    }
}

/// Block index storage on RocksDB.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path.
    pub fn open(path: impl AsRef<Path>, options: &StoreOptions) -> Result<Self, IndexError> {
        let cache = Cache::new_lru_cache(options.cache_size_mb.saturating_mul(1024 * 1024));
        let mut table_opts = BlockBasedOptions::default();
        table_opts.set_block_cache(&cache);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(options.create_if_missing);
        db_opts.set_max_open_files(options.max_open_files);
        db_opts.set_block_based_table_factory(&table_opts);

        let db = DB::open(&db_opts, path.as_ref()).map_err(|e| IndexError::Storage(e.to_string()))?;
        tracing::info!(
            path = %path.as_ref().display(),
            cache_mb = options.cache_size_mb,
            "opened block index store"
        );
        Ok(Self { db })
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), IndexError> {
        self.db
            .flush()
            .map_err(|e| IndexError::Storage(e.to_string()))
    }

    /// Trigger manual compaction over the whole keyspace.
    ///
    /// Reclaims space from erased records, e.g. after a load pruned many
    /// incomplete entries.
    pub fn compact(&self) {
        self.db.compact_range(None::<&[u8]>, None::<&[u8]>);
    }

    fn write_options(durable: bool) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(durable);
        opts
    }
}

impl KeyValueStore for RocksStore {
    type Cursor<'a>
        = RocksCursor<'a>
    where
        Self: 'a;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexError> {
        self.db
            .get(key)
            .map_err(|e| IndexError::Storage(e.to_string()))
    }

    fn put(&self, key: &[u8], value: &[u8], durable: bool) -> Result<(), IndexError> {
        self.db
            .put_opt(key, value, &Self::write_options(durable))
            .map_err(|e| IndexError::Storage(e.to_string()))
    }

    fn delete(&self, key: &[u8], durable: bool) -> Result<(), IndexError> {
        self.db
            .delete_opt(key, &Self::write_options(durable))
            .map_err(|e| IndexError::Storage(e.to_string()))
    }

    fn commit_batch(&self, batch: WriteBatch, durable: bool) -> Result<(), IndexError> {
        let mut rocks_batch = rocksdb::WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => rocks_batch.put(key, value),
                BatchOp::Delete { key } => rocks_batch.delete(key),
            }
        }
        self.db
            .write_opt(rocks_batch, &Self::write_options(durable))
            .map_err(|e| IndexError::Storage(e.to_string()))
    }

    fn cursor(&self) -> RocksCursor<'_> {
        RocksCursor {
            inner: self.db.raw_iterator(),
        }
    }
}

/// Cursor over a RocksDB iterator's implicit snapshot.
pub struct RocksCursor<'a> {
    inner: DBRawIterator<'a>,
}

impl KvCursor for RocksCursor<'_> {
    fn seek(&mut self, key: &[u8]) {
        self.inner.seek(key);
    }

    fn valid(&self) -> bool {
        self.inner.valid()
    }

    fn key(&self) -> Option<&[u8]> {
        self.inner.key()
    }

    fn value(&self) -> Option<&[u8]> {
        self.inner.value()
    }

    fn next(&mut self) {
        if self.inner.valid() {
            self.inner.next();
        }
    }

    fn status(&self) -> Result<(), IndexError> {
        self.inner
            .status()
            .map_err(|e| IndexError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, RocksStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("index"), &StoreOptions::default()).unwrap();
        (dir, store)
    }

    #[test]
    fn open_missing_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let opts = StoreOptions {
            create_if_missing: false,
            ..StoreOptions::default()
        };
        let err = RocksStore::open(dir.path().join("absent"), &opts).err().unwrap();
        assert!(!err.is_corruption());
    }

    #[test]
    fn durable_and_buffered_writes_read_back() {
        let (_dir, store) = temp_store();
        store.put(b"a", b"1", true).unwrap();
        store.put(b"b", b"2", false).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert!(store.exists(b"b").unwrap());
        store.delete(b"a", true).unwrap();
        assert!(!store.exists(b"a").unwrap());
    }

    #[test]
    fn batch_commit_and_cursor() {
        let (_dir, store) = temp_store();
        let mut batch = WriteBatch::new();
        batch.put(b"x2".to_vec(), b"2".to_vec());
        batch.put(b"x1".to_vec(), b"1".to_vec());
        batch.put(b"y1".to_vec(), b"3".to_vec());
        batch.delete(b"y1".to_vec());
        store.commit_batch(batch, true).unwrap();

        let mut cursor = store.cursor();
        cursor.seek(b"x");
        let mut keys = Vec::new();
        while cursor.valid() {
            keys.push(cursor.key().unwrap().to_vec());
            cursor.next();
        }
        cursor.status().unwrap();
        assert_eq!(keys, vec![b"x1".to_vec(), b"x2".to_vec()]);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        {
            let store = RocksStore::open(&path, &StoreOptions::default()).unwrap();
            store.put(b"k", b"v", true).unwrap();
            store.flush().unwrap();
            store.compact();
        }
        let store = RocksStore::open(&path, &StoreOptions::default()).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
