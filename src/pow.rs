//! Compact-target encoding and the proof-of-work acceptance check (C3,
//! spec.md §4.3). `BigUint` carries the 256-bit arithmetic the way the
//! teacher's `difficulty.rs` already does (`BigUint::from_bytes_be`).

use num_bigint::BigUint;
use num_traits::Zero;

use crate::hash::Hash256;

/// Decodes a compact ("nBits") target into its big-endian 256-bit form.
/// Returns `None` if the encoding is negative, overflows 32 bytes, or
/// decodes to zero (spec.md §4.3: "non-negative, non-zero, non-overflow").
pub fn decode_compact(bits: u32) -> Option<Hash256> {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007f_ffff;
    let is_negative = (bits & 0x0080_0000) != 0;

    if is_negative || mantissa == 0 {
        return None;
    }

    let value = if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        if exponent > 32 {
            return None;
        }
        BigUint::from(mantissa) << (8 * (exponent - 3))
    };

    if value.is_zero() {
        return None;
    }

    let bytes = value.to_bytes_be();
    if bytes.len() > 32 {
        return None;
    }

    let mut out = [0u8; 32];
    out[(32 - bytes.len())..].copy_from_slice(&bytes);
    Some(out)
}

/// Encodes a big-endian 256-bit target back into compact form.
pub fn encode_compact(target: &Hash256) -> u32 {
    let value = BigUint::from_bytes_be(target);
    if value.is_zero() {
        return 0;
    }

    let mut bytes = value.to_bytes_be();
    let mut exponent = bytes.len();

    // The mantissa's high bit is reserved as the sign bit; if the leading
    // byte would set it, shift the encoding out one more byte.
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
        exponent = bytes.len();
    }

    bytes.truncate(3);
    while bytes.len() < 3 {
        bytes.push(0);
    }

    let mantissa = ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32);
    ((exponent as u32) << 24) | mantissa
}

/// `CheckProofOfWork` (spec.md §4.3): the target decoded from `bits` must be
/// within `pow_limit`, and the block hash (as a 256-bit unsigned integer)
/// must not exceed it.
pub fn check_proof_of_work(hash: &Hash256, bits: u32, pow_limit: &Hash256) -> bool {
    let target = match decode_compact(bits) {
        Some(t) => t,
        None => return false,
    };

    if BigUint::from_bytes_be(&target) > BigUint::from_bytes_be(pow_limit) {
        return false;
    }

    BigUint::from_bytes_be(hash) <= BigUint::from_bytes_be(&target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_round_trips_for_typical_targets() {
        let target = {
            let mut t = [0u8; 32];
            t[4] = 0xff;
            t[5] = 0xff;
            t
        };
        let bits = encode_compact(&target);
        let decoded = decode_compact(bits).unwrap();
        assert_eq!(decoded, target);
    }

    #[test]
    fn rejects_negative_encoding() {
        assert!(decode_compact(0x01800000).is_none());
    }

    #[test]
    fn rejects_zero_mantissa() {
        assert!(decode_compact(0x04000000).is_none());
    }

    #[test]
    fn check_pow_rejects_hash_above_target() {
        let pow_limit = [0xff; 32];
        let mut target = [0u8; 32];
        target[31] = 0x01;
        let bits = encode_compact(&target);

        let mut low_hash = [0u8; 32];
        low_hash[31] = 0x00;
        assert!(check_proof_of_work(&low_hash, bits, &pow_limit));

        let mut high_hash = [0u8; 32];
        high_hash[0] = 0xff;
        assert!(!check_proof_of_work(&high_hash, bits, &pow_limit));
    }

    #[test]
    fn check_pow_rejects_target_above_limit() {
        let pow_limit = {
            let mut l = [0u8; 32];
            l[31] = 0x01;
            l
        };
        let mut target = [0u8; 32];
        target[4] = 0xff;
        let bits = encode_compact(&target);
        let hash = [0u8; 32];
        assert!(!check_proof_of_work(&hash, bits, &pow_limit));
    }
}
