//! Per-kind difficulty retargeting (C2, spec.md §4.2). PoW and PoS each keep
//! an entirely separate block history and target bound; the caller is
//! responsible for filtering `history` down to blocks of the kind being
//! retargeted before calling [`next_bits`].

use chrono::{DateTime, Utc};
use num_bigint::BigUint;

use crate::params::{BlockKind, ChainParams};
use crate::pow::{decode_compact, encode_compact};

#[derive(Debug, Clone, Copy)]
pub struct BlockStamp {
    pub time: DateTime<Utc>,
    pub bits: u32,
}

/// Computes `nextBits` for a new block of the given kind, given the
/// chronological (oldest-first) history of prior blocks of that same kind,
/// ending with the new block's immediate same-kind predecessor.
pub fn next_bits(params: &ChainParams, kind: BlockKind, history: &[BlockStamp]) -> u32 {
    if params.no_retargeting(kind) {
        return history
            .last()
            .map(|s| s.bits)
            .unwrap_or_else(|| encode_compact(&params.target_limit(kind)));
    }

    let target_limit = params.target_limit(kind);

    // Step 3: fewer than two same-kind blocks in history.
    if history.len() < 2 {
        return encode_compact(&target_limit);
    }

    let prev = history[history.len() - 1];
    let prev_prev = history[history.len() - 2];

    // Step 5: clamp actual spacing into [targetSpacing, 10*targetSpacing].
    let raw_spacing = (prev.time - prev_prev.time).num_seconds();
    let target_spacing = params.target_spacing as i64;
    let actual_spacing = raw_spacing.clamp(target_spacing, 10 * target_spacing);

    // Step 6.
    let interval = (params.target_timespan / params.target_spacing) as i64;

    // Step 7: new = prevTarget * ((interval-1)*spacing + 2*actual) / ((interval+1)*spacing).
    let prev_target = match decode_compact(prev.bits) {
        Some(t) => BigUint::from_bytes_be(&t),
        None => BigUint::from_bytes_be(&target_limit),
    };

    let numerator_scalar = (interval - 1) * target_spacing + 2 * actual_spacing;
    let denominator_scalar = (interval + 1) * target_spacing;

    let new_target = (prev_target * BigUint::from(numerator_scalar as u64))
        / BigUint::from(denominator_scalar as u64);

    // Step 8: saturate to (0, targetLimit].
    use num_traits::Zero;
    let limit = BigUint::from_bytes_be(&target_limit);
    let bounded = if new_target.is_zero() {
        BigUint::from(1u32)
    } else if new_target > limit {
        limit
    } else {
        new_target
    };

    let mut bytes = bounded.to_bytes_be();
    if bytes.len() > 32 {
        bytes = bytes[(bytes.len() - 32)..].to_vec();
    }
    let mut out = [0u8; 32];
    out[(32 - bytes.len())..].copy_from_slice(&bytes);
    encode_compact(&out)
}
