//! # tally-core
//! Foundation types for the Tally block index: hashes, headers, persisted
//! records, their binary codecs, the in-memory block DAG, and proof-of-work.

pub mod block_index;
pub mod codec;
pub mod constants;
pub mod error;
pub mod pow;
pub mod types;
