//! Core protocol types: hashes, block headers, and block-file bookkeeping.
//!
//! Hashes are stored in internal byte order (the order the hash function
//! produced them) and displayed byte-reversed, as Bitcoin-style chains do.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::codec;

/// A 32-byte hash value in internal byte order.
///
/// Used for block hashes, merkle roots, and transaction ids.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Marks "no previous block" in a genesis header.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Return the underlying bytes in internal order.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Double SHA-256 of `data`.
    pub fn double_sha256(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        Self(Sha256::digest(first).into())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().rev() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Block header in the 80-byte consensus layout.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BlockHeader {
    /// Block version.
    pub version: i32,
    /// Hash of the previous block header. Zero for genesis.
    pub prev_hash: Hash256,
    /// Merkle root of the block's transactions.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub time: u32,
    /// Compact difficulty target.
    pub bits: u32,
    /// Proof-of-work nonce.
    pub nonce: u32,
}

impl BlockHeader {
    /// Serialized header size in bytes.
    pub const SIZE: usize = 80;

    /// Compute the block hash: double SHA-256 over the 80-byte encoding.
    pub fn hash(&self) -> Hash256 {
        Hash256::double_sha256(&codec::encode_to_vec(self))
    }
}

/// Aggregate statistics for one block data file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BlockFileInfo {
    /// Number of blocks stored in the file.
    pub blocks: u32,
    /// Bytes of block data used.
    pub size: u32,
    /// Bytes used in the matching undo file.
    pub undo_size: u32,
    /// Lowest block height in the file.
    pub height_first: i32,
    /// Highest block height in the file.
    pub height_last: i32,
    /// Earliest block time in the file.
    pub time_first: u64,
    /// Latest block time in the file.
    pub time_last: u64,
}

impl BlockFileInfo {
    /// Account for one more block of `size` bytes written to this file.
    pub fn add_block(&mut self, height: i32, time: u64, size: u32) {
        if self.blocks == 0 || self.height_first > height {
            self.height_first = height;
        }
        if self.blocks == 0 || self.time_first > time {
            self.time_first = time;
        }
        self.blocks += 1;
        self.size = self.size.saturating_add(size);
        if height > self.height_last {
            self.height_last = height;
        }
        if time > self.time_last {
            self.time_last = time;
        }
    }
}

impl fmt::Display for BlockFileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BlockFileInfo(blocks={}, size={}, heights={}...{}, times={}...{})",
            self.blocks, self.size, self.height_first, self.height_last, self.time_first, self.time_last
        )
    }
}

/// Location of a transaction inside the block files.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct DiskTxPos {
    /// Block file number.
    pub file: i32,
    /// Offset of the containing block within the file.
    pub block_pos: u32,
    /// Offset of the transaction from the start of the block.
    pub tx_offset: u32,
}
