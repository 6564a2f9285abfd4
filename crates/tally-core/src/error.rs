//! Error types for the Tally block index.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")] Truncated { needed: usize, remaining: usize },
    #[error("{0} trailing bytes after record")] TrailingBytes(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorruptionError {
    #[error("undecodable record under key {key}: {source}")] Decode { key: String, source: CodecError },
    #[error("malformed key {key}: expected {expected} bytes, got {got}")] BadKey { key: String, expected: usize, got: usize },
    #[error("block index key {key} does not match header hash {hash}")] HashMismatch { key: String, hash: String },
    #[error("block {hash} fails proof of work for bits {bits:08x}")] ProofOfWork { hash: String, bits: u32 },
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error(transparent)] Corruption(#[from] CorruptionError),
    #[error("storage: {0}")] Storage(String),
}

impl IndexError {
    /// Whether this error means the persisted index cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }
}
