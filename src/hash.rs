//! Hash types and the digest helpers used throughout the core: double-SHA256
//! for transaction/block identifiers, SHA256+RIPEMD160 for address hashing.

use ripemd::{Digest, Ripemd160};

/// A 256-bit hash, stored big-endian the way the rest of the crate compares
/// and serializes it (see [`crate::pow`] for the target comparison).
pub type Hash256 = [u8; 32];

/// A 160-bit hash: the output of HASH160 (SHA256 then RIPEMD160), used for
/// P2PKH/P2WPKH key hashes and P2SH script hashes.
pub type Hash160 = [u8; 20];

pub const ZERO_HASH256: Hash256 = [0u8; 32];

/// SHA256(SHA256(data)), the digest used for txids, wtxids and block hashes.
pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = sha256(data);
    sha256(&first)
}

pub fn sha256(data: &[u8]) -> Hash256 {
    use ring::digest::{Context, SHA256};
    let mut ctx = Context::new(&SHA256);
    ctx.update(data);
    let digest = ctx.finish();
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    out
}

/// HASH160(data) = RIPEMD160(SHA256(data)), used to derive P2PKH/P2WPKH key
/// hashes and P2SH script hashes from raw public keys / scripts.
pub fn hash160(data: &[u8]) -> Hash160 {
    let sha = sha256(data);
    let mut hasher = Ripemd160::new();
    hasher.update(sha);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// Bitcoin-style binary merkle root over already-hashed leaves. An empty
/// input yields the zero hash; an odd level duplicates its last element.
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return ZERO_HASH256;
    }

    let mut level: Vec<Hash256> = leaves.to_vec();

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().unwrap();
            level.push(last);
        }

        level = level
            .chunks(2)
            .map(|pair| {
                let mut buf = Vec::with_capacity(64);
                buf.extend_from_slice(&pair[0]);
                buf.extend_from_slice(&pair[1]);
                sha256d(&buf)
            })
            .collect();
    }

    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_is_double_hashed() {
        let data = b"hello world";
        let once = sha256(data);
        let twice = sha256(&once);
        assert_eq!(sha256d(data), twice);
    }

    #[test]
    fn merkle_root_of_single_leaf_is_itself() {
        let leaf = sha256d(b"only txn");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn merkle_root_duplicates_odd_tail() {
        let a = sha256d(b"a");
        let b = sha256d(b"b");
        let c = sha256d(b"c");

        let with_three = merkle_root(&[a, b, c]);
        let with_duplicated_tail = merkle_root(&[a, b, c, c]);
        assert_eq!(with_three, with_duplicated_tail);
    }

    #[test]
    fn empty_merkle_root_is_zero() {
        assert_eq!(merkle_root(&[]), ZERO_HASH256);
    }
}
