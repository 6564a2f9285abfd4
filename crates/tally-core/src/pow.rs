//! Proof-of-work checks over compact difficulty targets.
//!
//! # Compact targets
//!
//! `bits` packs a 256-bit target as a one-byte base-256 exponent followed by
//! a 23-bit mantissa and a sign bit (0x00800000). A header is valid when its
//! hash, read as a little-endian 256-bit integer, is at most the target, and
//! the target itself is positive, in range, and no easier than the network's
//! proof-of-work limit.
//!
//! Targets here are `[u8; 32]` in big-endian order, so plain array
//! comparison is integer comparison.

use crate::constants::ConsensusParams;
use crate::types::Hash256;

/// Result of expanding a compact target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactTarget {
    /// Expanded target, big-endian.
    pub target: [u8; 32],
    /// The sign bit was set on a non-zero mantissa.
    pub negative: bool,
    /// The value does not fit in 256 bits.
    pub overflow: bool,
}

/// Expand compact `bits` into a 256-bit target.
pub fn compact_to_target(bits: u32) -> CompactTarget {
    let size = (bits >> 24) as usize;
    let mut word = bits & 0x007f_ffff;
    let mut target = [0u8; 32];

    if size <= 3 {
        word >>= 8 * (3 - size);
        target[28..].copy_from_slice(&word.to_be_bytes());
    } else {
        let shift = size - 3;
        for (i, byte) in word.to_be_bytes()[1..].iter().rev().enumerate() {
            if let Some(pos) = 31usize.checked_sub(shift + i) {
                target[pos] = *byte;
            }
        }
    }

    let negative = word != 0 && bits & 0x0080_0000 != 0;
    let overflow = word != 0
        && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));

    CompactTarget {
        target,
        negative,
        overflow,
    }
}

/// Check that `hash` satisfies the difficulty claimed by `bits`.
pub fn check_proof_of_work(hash: &Hash256, bits: u32, params: &ConsensusParams) -> bool {
    let expanded = compact_to_target(bits);
    if expanded.negative
        || expanded.overflow
        || expanded.target == [0u8; 32]
        || expanded.target > params.pow_limit
    {
        return false;
    }

    let mut value = hash.0;
    value.reverse();
    value <= expanded.target
}

/// Difficulty as a multiple of the minimum difficulty (`bits = 0x1d00ffff`).
pub fn difficulty_from_bits(bits: u32) -> f64 {
    let mut shift = (bits >> 24) & 0xff;
    let mantissa = bits & 0x00ff_ffff;
    if mantissa == 0 {
        return 0.0;
    }
    let mut diff = f64::from(0x0000_ffff_u32) / f64::from(mantissa);

    while shift < 29 {
        diff *= 256.0;
        shift += 1;
    }
    while shift > 29 {
        diff /= 256.0;
        shift -= 1;
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::NetworkType;

    fn be(hex_str: &str) -> [u8; 32] {
        let mut out = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut out).unwrap();
        out
    }

    #[test]
    fn compact_mainnet_limit() {
        let t = compact_to_target(0x1d00_ffff);
        assert_eq!(
            t.target,
            be("00000000ffff0000000000000000000000000000000000000000000000000000")
        );
        assert!(!t.negative);
        assert!(!t.overflow);
    }

    #[test]
    fn compact_small_exponent() {
        let t = compact_to_target(0x01fe_dcba);
        assert_eq!(t.target[31], 0x7e);
        assert!(t.target[..31].iter().all(|b| *b == 0));
        assert!(t.negative);
    }

    #[test]
    fn compact_negative_and_overflow() {
        let neg = compact_to_target(0x0492_3456);
        assert!(neg.negative);
        assert_eq!(&neg.target[28..], &[0x12, 0x34, 0x56, 0x00]);

        assert!(compact_to_target(0xff12_3456).overflow);
        assert!(!compact_to_target(0x2200_00ff).overflow);
        assert!(compact_to_target(0x2200_0100).overflow);
    }

    #[test]
    fn compact_zero() {
        let t = compact_to_target(0);
        assert_eq!(t.target, [0u8; 32]);
        assert!(!t.negative && !t.overflow);
    }

    #[test]
    fn genesis_headers_pass_pow() {
        for net in [NetworkType::Mainnet, NetworkType::Testnet, NetworkType::Regtest] {
            let header = net.genesis_header();
            assert!(
                check_proof_of_work(&header.hash(), header.bits, &net.params()),
                "{net} genesis should pass"
            );
        }
    }

    #[test]
    fn tampered_header_fails_mainnet_pow() {
        let mut header = NetworkType::Mainnet.genesis_header();
        header.nonce += 1;
        assert!(!check_proof_of_work(
            &header.hash(),
            header.bits,
            &NetworkType::Mainnet.params()
        ));
    }

    #[test]
    fn target_above_limit_fails() {
        let header = NetworkType::Regtest.genesis_header();
        assert!(!check_proof_of_work(
            &header.hash(),
            header.bits,
            &NetworkType::Mainnet.params()
        ));
    }

    #[test]
    fn degenerate_bits_fail() {
        let params = NetworkType::Regtest.params();
        assert!(!check_proof_of_work(&Hash256::ZERO, 0, &params));
        assert!(!check_proof_of_work(&Hash256::ZERO, 0x0492_3456, &params));
        assert!(!check_proof_of_work(&Hash256::ZERO, 0xff12_3456, &params));
        assert!(check_proof_of_work(&Hash256::ZERO, 0x207f_ffff, &params));
    }

    #[test]
    fn difficulty_values() {
        assert!((difficulty_from_bits(0x1d00_ffff) - 1.0).abs() < f64::EPSILON);
        let regtest = difficulty_from_bits(0x207f_ffff);
        assert!((regtest - 4.656_542_373_906_925e-10).abs() < 1e-20);
        assert!(difficulty_from_bits(0x1b04_04cb) > 16_000.0);
        assert_eq!(difficulty_from_bits(0x1d00_0000), 0.0);
    }
}
