//! Network selection and consensus parameters consumed by the index loader.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{BlockHeader, Hash256};

/// Merkle root of the genesis block shared by every network, internal order.
const GENESIS_MERKLE_ROOT: [u8; 32] = [
    0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2, 0x7a, 0xc7, 0x2c, 0x3e, 0x67, 0x76, 0x8f, 0x61,
    0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32, 0x3a, 0x9f, 0xb8, 0xaa, 0x4b, 0x1e, 0x5e, 0x4a,
];

/// Proof-of-work limit for mainnet and testnet, as a big-endian 256-bit integer.
const MAIN_POW_LIMIT: [u8; 32] = {
    let mut limit = [0xff; 32];
    limit[0] = 0;
    limit[1] = 0;
    limit[2] = 0;
    limit[3] = 0;
    limit
};

/// Proof-of-work limit for regtest, as a big-endian 256-bit integer.
const REGTEST_POW_LIMIT: [u8; 32] = {
    let mut limit = [0xff; 32];
    limit[0] = 0x7f;
    limit
};

/// Network type: Mainnet, Testnet, or Regtest.
///
/// Controls the proof-of-work limit, the genesis header, and the data
/// directory suffix.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Production network.
    #[default]
    Mainnet,
    /// Public test network.
    Testnet,
    /// Local regression-test network with trivial difficulty.
    Regtest,
}

impl NetworkType {
    /// Subdirectory name appended to the base data directory path.
    pub fn data_dir_suffix(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }

    /// Consensus parameters for this network.
    pub fn params(&self) -> ConsensusParams {
        match self {
            Self::Mainnet | Self::Testnet => ConsensusParams {
                network: *self,
                pow_limit: MAIN_POW_LIMIT,
                pow_limit_bits: 0x1d00_ffff,
            },
            Self::Regtest => ConsensusParams {
                network: *self,
                pow_limit: REGTEST_POW_LIMIT,
                pow_limit_bits: 0x207f_ffff,
            },
        }
    }

    /// The genesis block header of this network.
    pub fn genesis_header(&self) -> BlockHeader {
        let (time, bits, nonce) = match self {
            Self::Mainnet => (1_231_006_505, 0x1d00_ffff, 2_083_236_893),
            Self::Testnet => (1_296_688_602, 0x1d00_ffff, 414_098_458),
            Self::Regtest => (1_296_688_602, 0x207f_ffff, 2),
        };
        BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root: Hash256(GENESIS_MERKLE_ROOT),
            time,
            bits,
            nonce,
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.data_dir_suffix())
    }
}

impl FromStr for NetworkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Self::Mainnet),
            "testnet" | "test" => Ok(Self::Testnet),
            "regtest" => Ok(Self::Regtest),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// Network rules needed to re-check stored headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusParams {
    pub network: NetworkType,
    /// Easiest allowed target, big-endian.
    pub pow_limit: [u8; 32],
    /// `pow_limit` in compact form.
    pub pow_limit_bits: u32,
}
