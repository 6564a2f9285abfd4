//! In-memory [`KeyValueStore`] for tests and benchmarks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;
use tally_core::error::IndexError;

use super::{BatchOp, KeyValueStore, KvCursor, WriteBatch};

/// `BTreeMap`-backed store.
///
/// Durability is a no-op, but durable writes are counted so callers can
/// check which writes asked for a sync. [`fail_next_commit`] makes the next
/// batch commit fail without applying anything.
///
/// [`fail_next_commit`]: MemoryStore::fail_next_commit
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    fail_next_commit: AtomicBool,
    durable_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next [`commit_batch`](KeyValueStore::commit_batch) fail.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of writes, deletes, and commits made with `durable = true`.
    pub fn durable_writes(&self) -> usize {
        self.durable_writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    fn note_durable(&self, durable: bool) {
        if durable {
            self.durable_writes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl KeyValueStore for MemoryStore {
    type Cursor<'a>
        = MemoryCursor
    where
        Self: 'a;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8], durable: bool) -> Result<(), IndexError> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        self.note_durable(durable);
        Ok(())
    }

    fn delete(&self, key: &[u8], durable: bool) -> Result<(), IndexError> {
        self.map.write().remove(key);
        self.note_durable(durable);
        Ok(())
    }

    fn commit_batch(&self, batch: WriteBatch, durable: bool) -> Result<(), IndexError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(IndexError::Storage("injected commit failure".into()));
        }
        let mut map = self.map.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        self.note_durable(durable);
        Ok(())
    }

    fn cursor(&self) -> MemoryCursor {
        let entries = self
            .map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        MemoryCursor { entries, pos: 0 }
    }
}

/// Cursor over a snapshot of a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryCursor {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
}

impl KvCursor for MemoryCursor {
    fn seek(&mut self, key: &[u8]) {
        self.pos = self.entries.partition_point(|(k, _)| k.as_slice() < key);
    }

    fn valid(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn key(&self) -> Option<&[u8]> {
        self.entries.get(self.pos).map(|(k, _)| k.as_slice())
    }

    fn value(&self) -> Option<&[u8]> {
        self.entries.get(self.pos).map(|(_, v)| v.as_slice())
    }

    fn next(&mut self) {
        if self.valid() {
            self.pos += 1;
        }
    }

    fn status(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store = MemoryStore::new();
        store.put(b"k", b"v", false).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(store.exists(b"k").unwrap());
        store.delete(b"k", true).unwrap();
        assert_eq!(store.get(b"k").unwrap(), None);
        assert_eq!(store.durable_writes(), 1);
    }

    #[test]
    fn cursor_seeks_and_walks_in_order() {
        let store = MemoryStore::new();
        for key in [&b"b2"[..], b"a1", b"b1", b"c1"] {
            store.put(key, b"x", false).unwrap();
        }
        let mut cursor = store.cursor();
        cursor.seek(b"b");
        let mut seen = Vec::new();
        while cursor.valid() {
            seen.push(cursor.key().unwrap().to_vec());
            cursor.next();
        }
        assert_eq!(seen, vec![b"b1".to_vec(), b"b2".to_vec(), b"c1".to_vec()]);
        assert!(cursor.key().is_none());
        cursor.status().unwrap();
    }

    #[test]
    fn cursor_is_a_snapshot() {
        let store = MemoryStore::new();
        store.put(b"a", b"1", false).unwrap();
        let mut cursor = store.cursor();
        store.delete(b"a", false).unwrap();
        cursor.seek(b"");
        assert_eq!(cursor.value(), Some(&b"1"[..]));
    }

    #[test]
    fn injected_failure_applies_nothing() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.put(b"b".to_vec(), b"2".to_vec());

        store.fail_next_commit();
        assert!(store.commit_batch(batch.clone(), true).is_err());
        assert!(store.is_empty());

        store.commit_batch(batch, true).unwrap();
        assert_eq!(store.len(), 2);
    }
}
