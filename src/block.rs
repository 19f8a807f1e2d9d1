//! Block header and body (C2/C3 inputs; spec.md §3/§4.2/§4.5). Header
//! hashing follows the teacher's `RawBlockHeader` pattern (`v1/block.rs`):
//! a sibling struct holding every field but the hash.

use serde::{Deserialize, Serialize};

use crate::hash::{merkle_root, sha256d, Hash256};
use crate::params::BlockKind;
use crate::tx::Transaction;

pub type BlockNonce = [u8; 32];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Compact-encoded target (C3).
    pub bits: u32,
    pub nonce: BlockNonce,
}

#[derive(Serialize, Deserialize)]
struct RawHeader<'a> {
    version: u32,
    prev_hash: Hash256,
    merkle_root: Hash256,
    timestamp: chrono::DateTime<chrono::Utc>,
    bits: u32,
    nonce: &'a BlockNonce,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash256 {
        let raw = RawHeader {
            version: self.version,
            prev_hash: self.prev_hash,
            merkle_root: self.merkle_root,
            timestamp: self.timestamp,
            bits: self.bits,
            nonce: &self.nonce,
        };
        let bytes = bincode::serialize(&raw).expect("header fields always serialize");
        sha256d(&bytes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// A block is PoS iff its second transaction looks like a coinstake
    /// (spec.md §4.2 step 1, §4.5 "PoS blocks further require exactly the
    /// coinstake transaction at index 1").
    pub fn kind(&self) -> BlockKind {
        if self.has_coinstake() {
            BlockKind::ProofOfStake
        } else {
            BlockKind::ProofOfWork
        }
    }

    pub fn has_coinstake(&self) -> bool {
        self.transactions
            .get(1)
            .map(|tx| tx.looks_like_coinstake())
            .unwrap_or(false)
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    pub fn coinstake(&self) -> Option<&Transaction> {
        if self.has_coinstake() {
            self.transactions.get(1)
        } else {
            None
        }
    }

    pub fn compute_merkle_root(&self) -> Hash256 {
        let leaves: Vec<Hash256> = self.transactions.iter().map(|tx| tx.txid()).collect();
        merkle_root(&leaves)
    }

    /// Checks the header's advertised root against the transactions actually
    /// carried by the block.
    pub fn merkle_root_is_consistent(&self) -> bool {
        self.header.merkle_root == self.compute_merkle_root()
    }
}

/// Median of up to the last 11 ancestor timestamps (SPEC_FULL.md §4
/// supplement), used as the `lockTimeCutoff` for time-locked transactions
/// and token-lock-time evaluation (spec.md §4.6 Transfer). The genesis block
/// has no ancestors at all; callers pass `fallback` (conventionally the
/// block's own timestamp) for that case, the way Bitcoin Core's
/// `GetMedianTimePast` treats a null ancestor pointer.
pub fn median_time_past(
    ancestor_timestamps: &[chrono::DateTime<chrono::Utc>],
    fallback: chrono::DateTime<chrono::Utc>,
) -> chrono::DateTime<chrono::Utc> {
    if ancestor_timestamps.is_empty() {
        return fallback;
    }
    let take = ancestor_timestamps.len().min(11);
    let mut window: Vec<_> = ancestor_timestamps[ancestor_timestamps.len() - take..].to_vec();
    window.sort();
    window[window.len() / 2]
}
