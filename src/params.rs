//! `ChainParams`: the per-network constants `spec.md` leaves as bare numbers
//! (§4.2 retarget inputs, §4.6 token fees, §9 Open Questions). Generalizes the
//! teacher's scattered `pub const`s (`difficulty.rs::TARGET_BLOCK_INTERVAL`,
//! `v1/transaction.rs::MAX_TXN_AMOUNT`/`MIN_TXN_FEE`) into one value type with
//! a constructor per network, instead of `cfg`-gating constants at the crate
//! root.

use crate::amount::Amount;
use crate::hash::Hash256;

/// Which proof system produced a block. The retarget engine (C2) keeps
/// entirely separate histories and target bounds per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    ProofOfWork,
    ProofOfStake,
}

#[derive(Debug, Clone)]
pub struct ChainParams {
    pub network: &'static str,

    /// Seconds between blocks the retarget engine aims for (same quantity
    /// for both PoW and PoS histories; only the bound differs).
    pub target_spacing: u64,
    /// Total seconds the retarget window covers (`interval = timespan / spacing`).
    pub target_timespan: u64,
    pub pow_limit: Hash256,
    pub pos_limit: Hash256,
    pub pow_no_retargeting: bool,
    pub pos_no_retargeting: bool,

    /// Number of confirmations before a coinbase/coinstake output may be spent.
    pub coinbase_maturity: u32,
    /// How long an entry may sit in the mempool before `expire_old` removes it.
    pub mempool_expiry: chrono::Duration,

    pub bip34_height: u32,
    pub bip65_height: u32,
    pub bip66_height: u32,

    pub root_fee: Amount,
    pub sub_fee: Amount,
    pub unique_fee: Amount,
    pub reissue_fee: Amount,
    pub username_fee: Amount,
    pub genesis_fee_script: Vec<u8>,
}

impl ChainParams {
    pub fn mainnet() -> Self {
        ChainParams {
            network: "main",
            target_spacing: 60,
            target_timespan: 60 * 60, // 1 hour window, as in the retarget worked example (spec.md S6)
            pow_limit: pow_limit_bytes(0x1e),
            pos_limit: pow_limit_bytes(0x1c),
            pow_no_retargeting: false,
            pos_no_retargeting: false,
            coinbase_maturity: 100,
            mempool_expiry: chrono::Duration::hours(336), // two weeks, Bitcoin Core's default
            bip34_height: 0,
            bip65_height: 0,
            bip66_height: 0,
            root_fee: Amount::new(500 * crate::amount::COIN).unwrap(),
            sub_fee: Amount::new(100 * crate::amount::COIN).unwrap(),
            unique_fee: Amount::new(5 * crate::amount::COIN).unwrap(),
            reissue_fee: Amount::new(100 * crate::amount::COIN).unwrap(),
            username_fee: Amount::new(500 * crate::amount::COIN).unwrap(),
            genesis_fee_script: vec![],
        }
    }

    pub fn testnet() -> Self {
        ChainParams {
            network: "test",
            target_spacing: 64,
            target_timespan: 16 * 60,
            pow_no_retargeting: false,
            pos_no_retargeting: false,
            coinbase_maturity: 10,
            mempool_expiry: chrono::Duration::hours(24),
            ..ChainParams::mainnet()
        }
    }

    pub fn regtest() -> Self {
        ChainParams {
            network: "regtest",
            target_spacing: 1,
            target_timespan: 60,
            pow_limit: [0xff; 32],
            pos_limit: [0xff; 32],
            pow_no_retargeting: true,
            pos_no_retargeting: true,
            coinbase_maturity: 1,
            mempool_expiry: chrono::Duration::hours(24),
            bip34_height: 0,
            bip65_height: 0,
            bip66_height: 0,
            ..ChainParams::mainnet()
        }
    }

    pub fn target_limit(&self, kind: BlockKind) -> Hash256 {
        match kind {
            BlockKind::ProofOfWork => self.pow_limit,
            BlockKind::ProofOfStake => self.pos_limit,
        }
    }

    pub fn no_retargeting(&self, kind: BlockKind) -> bool {
        match kind {
            BlockKind::ProofOfWork => self.pow_no_retargeting,
            BlockKind::ProofOfStake => self.pos_no_retargeting,
        }
    }

    pub fn bip34_enabled(&self, height: u32) -> bool {
        height >= self.bip34_height
    }

    pub fn bip65_enabled(&self, height: u32) -> bool {
        height >= self.bip65_height
    }

    pub fn bip66_enabled(&self, height: u32) -> bool {
        height >= self.bip66_height
    }
}

/// Builds a target-limit bound with a single set bit at byte `exponent`,
/// counting from the most significant byte — a convenient stand-in for the
/// real network's compact-encoded limits (spec.md §9 explicitly tells us not
/// to guess the source's exact magic numbers).
fn pow_limit_bytes(leading_zero_bytes: u8) -> Hash256 {
    let mut out = [0u8; 32];
    let idx = leading_zero_bytes as usize;
    if idx < 32 {
        out[idx] = 0xff;
        if idx + 1 < 32 {
            out[idx + 1] = 0xff;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn testnet_and_mainnet_differ_only_where_intended() {
        let main = ChainParams::mainnet();
        let test = ChainParams::testnet();
        assert_ne!(main.target_spacing, test.target_spacing);
        assert_eq!(main.root_fee, test.root_fee);
    }

    #[test]
    fn regtest_disables_retargeting_for_both_kinds() {
        let regtest = ChainParams::regtest();
        assert!(regtest.no_retargeting(BlockKind::ProofOfWork));
        assert!(regtest.no_retargeting(BlockKind::ProofOfStake));
    }

    #[test]
    fn activation_predicates_are_independent() {
        let mut params = ChainParams::mainnet();
        params.bip34_height = 10;
        params.bip65_height = 20;
        params.bip66_height = 30;

        assert!(params.bip34_enabled(15));
        assert!(!params.bip65_enabled(15));
        assert!(!params.bip66_enabled(15));
    }
}
