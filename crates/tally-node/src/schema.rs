//! Keyspace layout of the block tree database.
//!
//! Every table shares one keyspace and is selected by its first byte:
//!
//! | Prefix | Key body                | Value |
//! |--------|-------------------------|-------|
//! | `b`    | 32-byte block hash      | block index record |
//! | `f`    | file id, i32 big-endian | block file info |
//! | `l`    | none                    | last block file id |
//! | `M`    | none                    | max block file id |
//! | `t`    | 32-byte txid            | transaction position |
//! | `R`    | none                    | reindex marker |
//! | `F`    | ASCII flag name         | `1` or `0` |
//!
//! File ids are big-endian in keys so file info records scan in id order.
//! Value encodings live in [`tally_core::codec`].

use tally_core::error::CorruptionError;
use tally_core::types::Hash256;

pub const DB_BLOCK_INDEX: u8 = b'b';
pub const DB_BLOCK_FILES: u8 = b'f';
pub const DB_LAST_BLOCK: u8 = b'l';
pub const DB_MAX_BLOCK_FILE: u8 = b'M';
pub const DB_TXINDEX: u8 = b't';
pub const DB_REINDEX_FLAG: u8 = b'R';
pub const DB_FLAG: u8 = b'F';

/// Stored value of a named flag set to true.
pub const FLAG_TRUE: u8 = b'1';
/// Stored value of a named flag set to false.
pub const FLAG_FALSE: u8 = b'0';

/// Value stored under the reindex marker. Only its presence matters.
pub const REINDEX_MARKER: &[u8] = b"1";

/// Returned by max-block-file reads when nothing was ever written.
pub const MAX_BLOCK_FILE_UNSET: i32 = -2;

/// Length of a block index key: prefix plus hash.
pub const BLOCK_INDEX_KEY_LEN: usize = 33;

/// Length of a file info key: prefix plus file id.
pub const FILE_INFO_KEY_LEN: usize = 5;

fn hash_key(prefix: u8, hash: &Hash256) -> Vec<u8> {
    let mut key = Vec::with_capacity(BLOCK_INDEX_KEY_LEN);
    key.push(prefix);
    key.extend_from_slice(hash.as_bytes());
    key
}

pub fn block_index_key(hash: &Hash256) -> Vec<u8> {
    hash_key(DB_BLOCK_INDEX, hash)
}

pub fn file_info_key(file: i32) -> Vec<u8> {
    let mut key = Vec::with_capacity(FILE_INFO_KEY_LEN);
    key.push(DB_BLOCK_FILES);
    key.extend_from_slice(&file.to_be_bytes());
    key
}

pub fn last_block_file_key() -> [u8; 1] {
    [DB_LAST_BLOCK]
}

pub fn max_block_file_key() -> [u8; 1] {
    [DB_MAX_BLOCK_FILE]
}

pub fn tx_index_key(txid: &Hash256) -> Vec<u8> {
    hash_key(DB_TXINDEX, txid)
}

pub fn reindex_key() -> [u8; 1] {
    [DB_REINDEX_FLAG]
}

pub fn flag_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + name.len());
    key.push(DB_FLAG);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Hex rendering of a raw key for logs and errors.
pub fn display_key(key: &[u8]) -> String {
    hex::encode(key)
}

/// Extract the block hash from a `b`-prefixed key.
pub fn parse_block_index_key(key: &[u8]) -> Result<Hash256, CorruptionError> {
    let body = match key.split_first() {
        Some((&DB_BLOCK_INDEX, body)) if body.len() == 32 => body,
        _ => {
            return Err(CorruptionError::BadKey {
                key: display_key(key),
                expected: BLOCK_INDEX_KEY_LEN,
                got: key.len(),
            });
        }
    };
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(body);
    Ok(Hash256(bytes))
}

/// Extract the file id from an `f`-prefixed key.
pub fn parse_file_info_key(key: &[u8]) -> Result<i32, CorruptionError> {
    match key {
        [DB_BLOCK_FILES, a, b, c, d] => Ok(i32::from_be_bytes([*a, *b, *c, *d])),
        _ => Err(CorruptionError::BadKey {
            key: display_key(key),
            expected: FILE_INFO_KEY_LEN,
            got: key.len(),
        }),
    }
}
