//! Ordered key-value storage behind the block index.
//!
//! [`KeyValueStore`] is the narrow surface the block tree needs: point reads
//! and writes, all-or-nothing batches, and a forward cursor for prefix
//! scans. Every write takes a `durable` flag; `true` must not return until
//! the write is on stable storage.
//!
//! Two backends:
//! - [`RocksStore`]: RocksDB, used by the node
//! - [`MemoryStore`]: `BTreeMap` with commit fault injection, used in tests

mod memory;
mod rocks;

pub use memory::{MemoryCursor, MemoryStore};
pub use rocks::{RocksCursor, RocksStore, StoreOptions};

use tally_core::error::IndexError;

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// An ordered list of writes applied atomically by
/// [`KeyValueStore::commit_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Forward iterator over a store in ascending key order.
///
/// A cursor sees the store as it was when the cursor was created; writes
/// made while it is open do not change what it yields.
pub trait KvCursor {
    /// Position at the first key `>= key`.
    fn seek(&mut self, key: &[u8]);
    fn valid(&self) -> bool;
    fn key(&self) -> Option<&[u8]>;
    fn value(&self) -> Option<&[u8]>;
    fn next(&mut self);
    /// Any engine error hit while iterating.
    fn status(&self) -> Result<(), IndexError>;
}

/// Ordered byte-keyed storage with atomic batches.
pub trait KeyValueStore {
    type Cursor<'a>: KvCursor
    where
        Self: 'a;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexError>;

    fn put(&self, key: &[u8], value: &[u8], durable: bool) -> Result<(), IndexError>;

    fn delete(&self, key: &[u8], durable: bool) -> Result<(), IndexError>;

    fn exists(&self, key: &[u8]) -> Result<bool, IndexError> {
        Ok(self.get(key)?.is_some())
    }

    /// Apply every operation in `batch`, or none of them.
    fn commit_batch(&self, batch: WriteBatch, durable: bool) -> Result<(), IndexError>;

    fn cursor(&self) -> Self::Cursor<'_>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_records_ops_in_order() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.delete(b"b".to_vec());
        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.into_ops(),
            vec![
                BatchOp::Put {
                    key: b"a".to_vec(),
                    value: b"1".to_vec()
                },
                BatchOp::Delete {
                    key: b"b".to_vec()
                },
            ]
        );
    }
}
