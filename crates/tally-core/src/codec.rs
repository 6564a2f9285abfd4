//! Fixed-width binary encodings for every persisted record kind.
//!
//! Integers are little-endian and hashes are written as their 32 raw bytes
//! in internal order. Layouts:
//!
//! | Record           | Bytes | Fields |
//! |------------------|-------|--------|
//! | [`BlockHeader`]  | 80    | version i32, prev hash, merkle root, time u32, bits u32, nonce u32 |
//! | [`BlockIndexRecord`] | 104 | height i32, status u32, tx_count u32, file i32, data_pos u32, undo_pos u32, header |
//! | [`BlockFileInfo`] | 36   | blocks u32, size u32, undo_size u32, height_first i32, height_last i32, time_first u64, time_last u64 |
//! | [`DiskTxPos`]    | 12    | file i32, block_pos u32, tx_offset u32 |
//! | file counter (`i32`) | 4 | value i32 |
//!
//! A block index value does not carry its own hash: decoding recomputes it
//! from the header, and the caller compares it against the key.
//!
//! Decoding never panics. Short input yields [`CodecError::Truncated`];
//! [`decode_exact`] additionally rejects trailing bytes.

use bytes::{Buf, BufMut};

use crate::block_index::{BlockIndexRecord, BlockStatus};
use crate::error::CodecError;
use crate::types::{BlockFileInfo, BlockHeader, DiskTxPos, Hash256};

/// A value with a fixed binary layout.
pub trait Encodable {
    /// Append the encoding of `self` to `buf`.
    fn encode(&self, buf: &mut impl BufMut);
}

/// A value that can be read back from its fixed binary layout.
pub trait Decodable: Sized {
    /// Read one value from the front of `buf`, advancing it.
    fn decode(buf: &mut &[u8]) -> Result<Self, CodecError>;
}

/// Encode a value into a fresh buffer.
pub fn encode_to_vec<T: Encodable>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.encode(&mut out);
    out
}

/// Decode a value that must span all of `bytes`.
pub fn decode_exact<T: Decodable>(bytes: &[u8]) -> Result<T, CodecError> {
    let mut buf = bytes;
    let value = T::decode(&mut buf)?;
    if !buf.is_empty() {
        return Err(CodecError::TrailingBytes(buf.len()));
    }
    Ok(value)
}

fn need(buf: &[u8], needed: usize) -> Result<(), CodecError> {
    if buf.remaining() < needed {
        return Err(CodecError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

impl Encodable for Hash256 {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(self.as_bytes());
    }
}

impl Decodable for Hash256 {
    fn decode(buf: &mut &[u8]) -> Result<Self, CodecError> {
        need(buf, 32)?;
        let mut bytes = [0u8; 32];
        buf.copy_to_slice(&mut bytes);
        Ok(Hash256(bytes))
    }
}

impl Encodable for i32 {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(*self);
    }
}

impl Decodable for i32 {
    fn decode(buf: &mut &[u8]) -> Result<Self, CodecError> {
        need(buf, 4)?;
        Ok(buf.get_i32_le())
    }
}

impl Encodable for BlockHeader {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.version);
        self.prev_hash.encode(buf);
        self.merkle_root.encode(buf);
        buf.put_u32_le(self.time);
        buf.put_u32_le(self.bits);
        buf.put_u32_le(self.nonce);
    }
}

impl Decodable for BlockHeader {
    fn decode(buf: &mut &[u8]) -> Result<Self, CodecError> {
        need(buf, BlockHeader::SIZE)?;
        let version = buf.get_i32_le();
        let prev_hash = Hash256::decode(buf)?;
        let merkle_root = Hash256::decode(buf)?;
        Ok(BlockHeader {
            version,
            prev_hash,
            merkle_root,
            time: buf.get_u32_le(),
            bits: buf.get_u32_le(),
            nonce: buf.get_u32_le(),
        })
    }
}

impl Encodable for BlockIndexRecord {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.height);
        buf.put_u32_le(self.status.bits());
        buf.put_u32_le(self.tx_count);
        buf.put_i32_le(self.file);
        buf.put_u32_le(self.data_pos);
        buf.put_u32_le(self.undo_pos);
        self.header.encode(buf);
    }
}

impl Decodable for BlockIndexRecord {
    fn decode(buf: &mut &[u8]) -> Result<Self, CodecError> {
        need(buf, BlockIndexRecord::ENCODED_SIZE)?;
        let height = buf.get_i32_le();
        let status = BlockStatus::from_bits(buf.get_u32_le());
        let tx_count = buf.get_u32_le();
        let file = buf.get_i32_le();
        let data_pos = buf.get_u32_le();
        let undo_pos = buf.get_u32_le();
        let header = BlockHeader::decode(buf)?;
        Ok(BlockIndexRecord {
            hash: header.hash(),
            height,
            file,
            data_pos,
            undo_pos,
            header,
            status,
            tx_count,
        })
    }
}

impl Encodable for BlockFileInfo {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.blocks);
        buf.put_u32_le(self.size);
        buf.put_u32_le(self.undo_size);
        buf.put_i32_le(self.height_first);
        buf.put_i32_le(self.height_last);
        buf.put_u64_le(self.time_first);
        buf.put_u64_le(self.time_last);
    }
}

impl Decodable for BlockFileInfo {
    fn decode(buf: &mut &[u8]) -> Result<Self, CodecError> {
        need(buf, 36)?;
        Ok(BlockFileInfo {
            blocks: buf.get_u32_le(),
            size: buf.get_u32_le(),
            undo_size: buf.get_u32_le(),
            height_first: buf.get_i32_le(),
            height_last: buf.get_i32_le(),
            time_first: buf.get_u64_le(),
            time_last: buf.get_u64_le(),
        })
    }
}

impl Encodable for DiskTxPos {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.file);
        buf.put_u32_le(self.block_pos);
        buf.put_u32_le(self.tx_offset);
    }
}

impl Decodable for DiskTxPos {
    fn decode(buf: &mut &[u8]) -> Result<Self, CodecError> {
        need(buf, 12)?;
        Ok(DiskTxPos {
            file: buf.get_i32_le(),
            block_pos: buf.get_u32_le(),
            tx_offset: buf.get_u32_le(),
        })
    }
}
