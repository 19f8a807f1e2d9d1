//! Transaction data model (C1, spec.md §3/§6): outpoints, outputs, inputs,
//! and the transaction envelope itself. `txid`/`wtxid` follow the teacher's
//! `UnhashedTransaction -> to_hashed` pattern (`v1/transaction.rs`): hash a
//! struct that holds every field except the hash, rather than hand-rolling a
//! byte writer.

use serde::{Deserialize, Serialize};

use crate::hash::{sha256d, Hash256};
use crate::script::Script;

pub const COINBASE_PREV_INDEX: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Outpoint {
    pub txid: Hash256,
    pub index: u32,
}

impl Outpoint {
    pub fn coinbase(txid: Hash256) -> Self {
        Outpoint { txid, index: COINBASE_PREV_INDEX }
    }

    pub fn is_coinbase(&self) -> bool {
        self.txid == crate::hash::ZERO_HASH256 && self.index == COINBASE_PREV_INDEX
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub amount: i64,
    pub script_pubkey: Script,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub prev_out: Outpoint,
    pub script_sig: Script,
    pub sequence: u32,
}

impl TxIn {
    pub fn is_final(&self) -> bool {
        self.sequence == u32::MAX
    }
}

/// Per-input witness stack, present only when the transaction carries
/// segwit-style inputs (spec.md §6: flag bytes `0x00 0x01` after `version`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Witness {
    pub stack: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub time: chrono::DateTime<chrono::Utc>,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
    pub witness: Option<Vec<Witness>>,
    /// Free-form data, e.g. the genesis message or an `OP_RETURN` payload
    /// mirror for non-core tooling. Not interpreted by the core.
    pub message: Option<String>,
}

/// Everything that feeds `txid`, minus witness data — the fields a
/// non-segwit peer would also sign over.
#[derive(Serialize, Deserialize)]
struct UnwitnessedTransaction<'a> {
    version: u32,
    time: chrono::DateTime<chrono::Utc>,
    vin: &'a [TxIn],
    vout: &'a [TxOut],
    lock_time: u32,
    message: &'a Option<String>,
}

/// Every field, including witness data — feeds `wtxid`.
#[derive(Serialize, Deserialize)]
struct WitnessedTransaction<'a> {
    version: u32,
    time: chrono::DateTime<chrono::Utc>,
    vin: &'a [TxIn],
    vout: &'a [TxOut],
    lock_time: u32,
    witness: &'a Option<Vec<Witness>>,
    message: &'a Option<String>,
}

impl Transaction {
    /// `H(serialize-without-witness)` (spec.md §3).
    pub fn txid(&self) -> Hash256 {
        let unwitnessed = UnwitnessedTransaction {
            version: self.version,
            time: self.time,
            vin: &self.vin,
            vout: &self.vout,
            lock_time: self.lock_time,
            message: &self.message,
        };
        let bytes = bincode::serialize(&unwitnessed).expect("transaction fields always serialize");
        sha256d(&bytes)
    }

    /// `H(serialize-with-witness)`, defined only when witness data is present;
    /// otherwise identical to `txid` (no witness to distinguish it from).
    pub fn wtxid(&self) -> Hash256 {
        if self.witness.is_none() {
            return self.txid();
        }
        let witnessed = WitnessedTransaction {
            version: self.version,
            time: self.time,
            vin: &self.vin,
            vout: &self.vout,
            lock_time: self.lock_time,
            witness: &self.witness,
            message: &self.message,
        };
        let bytes = bincode::serialize(&witnessed).expect("transaction fields always serialize");
        sha256d(&bytes)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prev_out.is_coinbase()
    }

    /// A coinstake is the second transaction of a PoS block; the marker here
    /// is structural (exactly one input spending a prior output and at least
    /// two outputs, the first of which is the empty "marker" output) rather
    /// than positional — callers at the block layer enforce the index-1 rule.
    pub fn looks_like_coinstake(&self) -> bool {
        !self.is_coinbase()
            && self.vout.first().map(|o| o.amount == 0).unwrap_or(false)
            && self.vout.len() >= 2
    }

    pub fn is_final(&self, height: u32, median_time: chrono::DateTime<chrono::Utc>) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let cutoff = if self.lock_time < LOCKTIME_THRESHOLD {
            height as i64
        } else {
            median_time.timestamp()
        };
        if (self.lock_time as i64) < cutoff {
            return true;
        }
        self.vin.iter().all(|i| i.is_final())
    }

    /// Approximate serialized size in bytes, used for mempool/template
    /// weight accounting (C5). Mirrors the teacher's `Transaction::size`
    /// (`v1/transaction.rs`) generalized to variable-length scripts.
    pub fn size(&self) -> usize {
        let base = bincode::serialized_size(&UnwitnessedTransaction {
            version: self.version,
            time: self.time,
            vin: &self.vin,
            vout: &self.vout,
            lock_time: self.lock_time,
            message: &self.message,
        })
        .unwrap_or(0) as usize;

        let witness_size: usize = self
            .witness
            .as_ref()
            .map(|stacks| stacks.iter().map(|w| w.stack.iter().map(|e| e.len()).sum::<usize>()).sum())
            .unwrap_or(0);

        base + witness_size
    }

    /// `WITNESS_SCALE_FACTOR · size`, matching spec.md §4.5's weight metric.
    pub fn weight(&self) -> u64 {
        WITNESS_SCALE_FACTOR as u64 * self.size() as u64
    }
}

/// Below this, `lock_time` is a block height; at or above, a Unix timestamp
/// (the usual UTXO-chain convention, carried unchanged by spec.md §3).
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

pub const WITNESS_SCALE_FACTOR: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::make_p2pkh;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            time: chrono::Utc::now(),
            vin: vec![TxIn {
                prev_out: Outpoint { txid: [1u8; 32], index: 0 },
                script_sig: Script::new(),
                sequence: u32::MAX,
            }],
            vout: vec![TxOut { amount: 5000, script_pubkey: make_p2pkh([2u8; 20]) }],
            lock_time: 0,
            witness: None,
            message: None,
        }
    }

    #[test]
    fn txid_is_stable_across_calls() {
        let tx = sample_tx();
        assert_eq!(tx.txid(), tx.txid());
    }

    #[test]
    fn wtxid_equals_txid_without_witness() {
        let tx = sample_tx();
        assert_eq!(tx.txid(), tx.wtxid());
    }

    #[test]
    fn wtxid_diverges_once_witness_is_attached() {
        let mut tx = sample_tx();
        let txid = tx.txid();
        tx.witness = Some(vec![Witness { stack: vec![vec![9; 4]] }]);
        assert_eq!(tx.txid(), txid, "txid must ignore witness data");
        assert_ne!(tx.wtxid(), txid);
    }

    #[test]
    fn zero_locktime_is_always_final() {
        let tx = sample_tx();
        assert!(tx.is_final(100, chrono::Utc::now()));
    }

    #[test]
    fn coinbase_detection_matches_zero_hash_marker() {
        let mut tx = sample_tx();
        tx.vin[0].prev_out = Outpoint::coinbase([0u8; 32]);
        assert!(tx.is_coinbase());
    }
}
