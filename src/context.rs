//! Explicit context handle (SPEC_FULL.md §9 redesign flag: "Globals for the
//! chain tip, mempool, and token cache" — pass a context handle through
//! every entry point; make creation/teardown explicit). `Context<S>` owns
//! the chain tip, the mempool, the governance store and the token engine,
//! and is the one place that enforces spec.md §5's lock-acquisition order
//! (`cs_main`, i.e. the tip lock, before the mempool's own internal lock).
//! Nothing here lives behind a `static`/`lazy_static` — a caller constructs
//! one `Context` at startup and drops it at shutdown.

use std::sync::Arc;

use tracing::info;

use crate::amount::Amount;
use crate::block::Block;
use crate::governance::GovernanceStore;
use crate::hash::Hash256;
use crate::mempool::{AncestorLimits, Mempool, RemovalReason};
use crate::params::{BlockKind, ChainParams};
use crate::pow::check_proof_of_work;
use crate::retarget::{next_bits, BlockStamp};
use crate::script::Script;
use crate::store::KvStore;
use crate::template::{assemble_block_template, BlockTemplate, TemplateConfig};
use crate::tokens::{TokenBlockUndo, TokenEngine, TokenResult};

use parking_lot::RwLock;

/// The chain tip this process currently considers best — the state spec.md
/// §9 says must stop being a global and start being owned explicitly.
/// Guarded by `Context`'s own `cs_main` lock.
#[derive(Debug, Clone)]
pub struct ChainTip {
    pub height: u32,
    pub hash: Hash256,
    pow_history: Vec<BlockStamp>,
    pos_history: Vec<BlockStamp>,
}

impl ChainTip {
    pub fn genesis() -> Self {
        ChainTip { height: 0, hash: [0u8; 32], pow_history: Vec::new(), pos_history: Vec::new() }
    }

    fn history(&self, kind: BlockKind) -> &[BlockStamp] {
        match kind {
            BlockKind::ProofOfWork => &self.pow_history,
            BlockKind::ProofOfStake => &self.pos_history,
        }
    }
}

/// Bundles chain params, the persistence-backed engines, and the mutable
/// chain tip. Both `governance` and `tokens` share one underlying store
/// (wrapped in an `Arc` so each engine can own a cheap handle to it) rather
/// than each owning a disjoint database, matching spec.md §6's
/// single-persisted-layout table.
pub struct Context<S: KvStore> {
    pub params: ChainParams,
    tip: RwLock<ChainTip>,
    pub mempool: Mempool,
    pub governance: GovernanceStore<Arc<S>>,
    pub tokens: TokenEngine<Arc<S>>,
}

impl<S: KvStore> Context<S> {
    /// Constructs a fresh context over `store`, seeding governance's genesis
    /// entries if they aren't already present.
    pub fn new(
        store: S,
        params: ChainParams,
        ancestor_limits: AncestorLimits,
        metadata_cache_size: usize,
    ) -> Self {
        let store = Arc::new(store);
        let governance = GovernanceStore::new(Arc::clone(&store));
        governance.init_genesis(&params).expect("genesis seed never fails against a store it just opened");

        Context {
            params,
            tip: RwLock::new(ChainTip::genesis()),
            mempool: Mempool::new(ancestor_limits),
            governance,
            tokens: TokenEngine::new(store, metadata_cache_size),
        }
    }

    pub fn tip(&self) -> ChainTip {
        self.tip.read().clone()
    }

    /// `GetNextWorkRequired`-equivalent (spec.md §4.2): the next `nBits` for
    /// a block of `kind` atop the current tip.
    pub fn next_bits(&self, kind: BlockKind) -> u32 {
        let tip = self.tip.read();
        next_bits(&self.params, kind, tip.history(kind))
    }

    pub fn check_proof_of_work(&self, hash: &Hash256, bits: u32, kind: BlockKind) -> bool {
        check_proof_of_work(hash, bits, &self.params.target_limit(kind))
    }

    /// `CreateNewBlock` (spec.md §4.5): assembles a template atop the
    /// current tip. Acquires `cs_main` (reading the tip height) before the
    /// mempool's own internal lock inside [`assemble_block_template`] —
    /// the order spec.md §5 mandates.
    pub fn build_template(
        &self,
        config: TemplateConfig,
        subsidy: Amount,
        coinbase_script: Script,
        kind: BlockKind,
    ) -> BlockTemplate {
        let tip = self.tip.read();
        let height = tip.height + 1;
        assemble_block_template(&self.mempool, config, height, chrono::Utc::now(), subsidy, coinbase_script, kind)
    }

    /// Connects `block`: commits the token engine's staged effects for it,
    /// drops its transactions from the mempool, and advances the recorded
    /// tip — `cs_main` held for the whole operation, the mempool's lock
    /// taken only transiently inside each `remove` call (spec.md §5's fixed
    /// acquisition order).
    pub fn connect_block(&self, block: &Block, stamp: BlockStamp) -> TokenResult<TokenBlockUndo> {
        let mut tip = self.tip.write();
        let undo = self.tokens.connect_block()?;

        for tx in &block.transactions {
            let txid = tx.txid();
            let _ = self.mempool.remove(&txid, RemovalReason::BlockInclusion);
        }

        tip.height += 1;
        tip.hash = block.hash();
        match block.kind() {
            BlockKind::ProofOfWork => tip.pow_history.push(stamp),
            BlockKind::ProofOfStake => tip.pos_history.push(stamp),
        }
        info!(height = tip.height, hash = %hex::encode(tip.hash), "block connected");
        Ok(undo)
    }

    /// Reverses a previously connected block, given its token-engine undo
    /// record and the tip state to restore (reorg handling).
    pub fn disconnect_block(
        &self,
        undo: &TokenBlockUndo,
        prior_height: u32,
        prior_hash: Hash256,
        kind: BlockKind,
    ) -> TokenResult<()> {
        let mut tip = self.tip.write();
        self.tokens.disconnect_block(undo)?;

        tip.height = prior_height;
        tip.hash = prior_hash;
        match kind {
            BlockKind::ProofOfWork => {
                tip.pow_history.pop();
            }
            BlockKind::ProofOfStake => {
                tip.pos_history.pop();
            }
        }
        info!(height = tip.height, "block disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockHeader;
    use crate::script::make_p2pkh;
    use crate::store::MemoryStore;
    use crate::tx::{Outpoint, Transaction, TxIn, TxOut};

    fn context() -> Context<MemoryStore> {
        Context::new(MemoryStore::new(), ChainParams::mainnet(), AncestorLimits::default(), 64)
    }

    #[test]
    fn new_context_seeds_governance_genesis() {
        let ctx = context();
        assert_eq!(
            ctx.governance.get_cost(crate::governance::CostType::Root).unwrap().unwrap(),
            ChainParams::mainnet().root_fee
        );
    }

    #[test]
    fn next_bits_returns_limit_for_a_fresh_tip() {
        let ctx = context();
        let bits = ctx.next_bits(BlockKind::ProofOfWork);
        assert_eq!(bits, crate::pow::encode_compact(&ctx.params.pow_limit));
    }

    #[test]
    fn build_template_with_empty_mempool_is_just_a_coinbase() {
        let ctx = context();
        let template = ctx.build_template(
            TemplateConfig::default(),
            Amount::new(5_000_000_000).unwrap(),
            make_p2pkh([1u8; 20]),
            BlockKind::ProofOfWork,
        );
        assert!(template.transactions.is_empty());
        assert_eq!(template.coinbase.vout[0].amount, 5_000_000_000);
    }

    #[test]
    fn connect_then_disconnect_block_restores_tip_and_token_state() {
        let ctx = context();
        ctx.tokens.issue_root("CTX", 100, 0, false, "addr", Amount::ZERO, Amount::ZERO).unwrap();

        let coinbase = Transaction {
            version: 1,
            time: chrono::Utc::now(),
            vin: vec![TxIn { prev_out: Outpoint::coinbase([0u8; 32]), script_sig: Script::new(), sequence: u32::MAX }],
            vout: vec![TxOut { amount: 5_000_000_000, script_pubkey: Script::new() }],
            lock_time: 0,
            witness: None,
            message: None,
        };
        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_hash: [0u8; 32],
                merkle_root: coinbase.txid(),
                timestamp: chrono::Utc::now(),
                bits: 0x1e00ffff,
                nonce: [0u8; 32],
            },
            transactions: vec![coinbase],
        };
        let stamp = BlockStamp { time: block.header.timestamp, bits: block.header.bits };

        let undo = ctx.connect_block(&block, stamp).unwrap();
        assert_eq!(ctx.tip().height, 1);
        assert_eq!(ctx.tokens.get_balance("CTX", "addr").unwrap(), 100);

        ctx.disconnect_block(&undo, 0, [0u8; 32], BlockKind::ProofOfWork).unwrap();
        assert_eq!(ctx.tip().height, 0);
        assert!(ctx.tokens.get_token_metadata_if_exists("CTX").unwrap().is_none());
    }
}
