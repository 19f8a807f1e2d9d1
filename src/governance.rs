//! Governance store (C7, spec.md §4.7/§6): a freeze/unfreeze registry for
//! script outputs, a height-indexed token-issuance cost table, and a
//! height-indexed fee-address table. spec.md §9 flags the teacher's
//! equivalent class as "a governance class extending the K/V wrapper via
//! inheritance" and asks for composition instead — `GovernanceStore` owns a
//! [`KvStore`] handle and delegates to it rather than inheriting from it.

use std::fmt;

use tracing::{debug, info, warn};

use crate::amount::Amount;
use crate::params::ChainParams;
use crate::store::{append_length_prefixed, KvStore, WriteBatch};

pub type GovernanceResult<T> = std::result::Result<T, Box<ErrorKind>>;

#[derive(Debug)]
pub enum ErrorKind {
    /// `RevertFreeze`/`RevertUnfreeze` invoked when the stored state doesn't
    /// reflect the operation being undone (spec.md §4.7, §7 "Consistency
    /// failures"). Fatal: the caller must treat the database as dirty.
    CorruptState(String),
    Store(Box<crate::store::ErrorKind>),
}

impl std::error::Error for ErrorKind {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::CorruptState(msg) => write!(f, "governance store corrupt: {}", msg),
            ErrorKind::Store(e) => write!(f, "governance store I/O error: {}", e),
        }
    }
}

impl From<Box<crate::store::ErrorKind>> for Box<ErrorKind> {
    fn from(e: Box<crate::store::ErrorKind>) -> Self {
        Box::new(ErrorKind::Store(e))
    }
}

/// Leading tag bytes, spec.md §6's persisted-layout table.
const TAG_INIT_SENTINEL: u8 = b'G';
const TAG_FROZEN_COUNT: u8 = b'N';
const TAG_FREEZE: u8 = b'a';
const TAG_COST: u8 = b'c';
const TAG_FEE_ADDRESS: u8 = b'f';

/// `(cost-type, height) -> amount` (spec.md §3 "Governance state"). Fixes the
/// Open Question in spec.md §9 about `GOVERNANCE_COST_SUB`/`_REISSUE`
/// wiring: this crate always reads `Sub` from `ChainParams::sub_fee` and
/// `Reissue` from `ChainParams::reissue_fee`, in both `init_genesis` and
/// runtime application, so the two can never disagree (SPEC_FULL.md §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CostType {
    Root = 0,
    Reissue = 1,
    Unique = 2,
    Sub = 3,
    Username = 4,
}

impl CostType {
    const ALL: [CostType; 5] =
        [CostType::Root, CostType::Reissue, CostType::Unique, CostType::Sub, CostType::Username];
}

fn freeze_key(script: &[u8]) -> Vec<u8> {
    let mut key = vec![TAG_FREEZE];
    key.extend_from_slice(script);
    key
}

fn cost_key(cost_type: CostType, height: u32) -> Vec<u8> {
    let mut key = vec![TAG_COST];
    key.extend_from_slice(&(cost_type as i32).to_be_bytes());
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn cost_type_prefix(cost_type: CostType) -> Vec<u8> {
    let mut key = vec![TAG_COST];
    key.extend_from_slice(&(cost_type as i32).to_be_bytes());
    key
}

fn fee_address_key(height: u32) -> Vec<u8> {
    let mut key = vec![TAG_FEE_ADDRESS];
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn encode_bool(b: bool) -> Vec<u8> {
    vec![b as u8]
}

fn decode_bool(bytes: &[u8]) -> bool {
    bytes.first().map(|b| *b != 0).unwrap_or(false)
}

fn encode_amount(amount: Amount) -> Vec<u8> {
    amount.units().to_be_bytes().to_vec()
}

fn decode_amount(bytes: &[u8]) -> Option<Amount> {
    let mut buf = [0u8; 8];
    if bytes.len() != 8 {
        return None;
    }
    buf.copy_from_slice(bytes);
    Amount::new(i64::from_be_bytes(buf)).ok()
}

fn encode_script(script: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    append_length_prefixed(&mut out, script);
    out
}

fn decode_script(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() < 4 {
        return Vec::new();
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    bytes.get(4..4 + len).map(|s| s.to_vec()).unwrap_or_default()
}

/// Owns a [`KvStore`] handle and implements the freeze table, cost table and
/// fee-address table on top of it (spec.md §4.7).
pub struct GovernanceStore<S: KvStore> {
    store: S,
}

impl<S: KvStore> GovernanceStore<S> {
    pub fn new(store: S) -> Self {
        GovernanceStore { store }
    }

    /// Initializes the genesis cost entries (spec.md §4.7: "Initialized at
    /// genesis with (ROOT/SUB/UNIQUE/REISSUE/USERNAME) cost entries at
    /// height 0 and a fee-address entry from chain params"). A no-op if
    /// already initialized.
    pub fn init_genesis(&self, params: &ChainParams) -> GovernanceResult<()> {
        if self.store.exists(&[TAG_INIT_SENTINEL])? {
            debug!("governance store already initialized, skipping genesis seed");
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        batch.put(vec![TAG_INIT_SENTINEL], encode_bool(true));
        batch.put(vec![TAG_FROZEN_COUNT], 0u32.to_be_bytes().to_vec());

        for cost_type in CostType::ALL {
            let amount = self.genesis_cost_for(params, cost_type);
            batch.put(cost_key(cost_type, 0), encode_amount(amount));
        }
        batch.put(fee_address_key(0), encode_script(&params.genesis_fee_script));

        self.store.write_batch(batch)?;
        info!(network = params.network, "governance store initialized at genesis");
        Ok(())
    }

    fn genesis_cost_for(&self, params: &ChainParams, cost_type: CostType) -> Amount {
        match cost_type {
            CostType::Root => params.root_fee,
            CostType::Sub => params.sub_fee,
            CostType::Unique => params.unique_fee,
            CostType::Reissue => params.reissue_fee,
            CostType::Username => params.username_fee,
        }
    }

    /// `FreezeScript` (spec.md §4.7). The frozen-count counter is updated in
    /// the same batch as the toggle it reflects (spec.md §5).
    pub fn freeze_script(&self, script: &[u8]) -> GovernanceResult<()> {
        let key = freeze_key(script);
        let was_frozen = self.store.read(&key)?.map(|v| decode_bool(&v)).unwrap_or(false);

        let mut batch = WriteBatch::new();
        batch.put(key, encode_bool(true));
        if !was_frozen {
            self.bump_frozen_count(&mut batch, 1)?;
        }
        self.store.write_batch(batch)?;
        warn!(script_len = script.len(), "script frozen");
        Ok(())
    }

    /// `UnfreezeScript` (spec.md §4.7).
    pub fn unfreeze_script(&self, script: &[u8]) -> GovernanceResult<()> {
        let key = freeze_key(script);
        let was_frozen = self.store.read(&key)?.map(|v| decode_bool(&v)).unwrap_or(false);

        let mut batch = WriteBatch::new();
        batch.put(key, encode_bool(false));
        if was_frozen {
            self.bump_frozen_count(&mut batch, -1)?;
        }
        self.store.write_batch(batch)?;
        info!(script_len = script.len(), "script unfrozen");
        Ok(())
    }

    /// `RevertFreeze` (spec.md §4.7): only valid when the last applied
    /// operation for `script` was a freeze, i.e. the stored entry is
    /// currently `true`. Unconditionally sets it to `false` and decrements
    /// the counter; any other starting state is `CorruptState`.
    pub fn revert_freeze(&self, script: &[u8]) -> GovernanceResult<()> {
        let key = freeze_key(script);
        match self.store.read(&key)? {
            Some(v) if decode_bool(&v) => {
                let mut batch = WriteBatch::new();
                batch.put(key, encode_bool(false));
                self.bump_frozen_count(&mut batch, -1)?;
                self.store.write_batch(batch)?;
                Ok(())
            }
            _ => Err(Box::new(ErrorKind::CorruptState(
                "RevertFreeze called but script was not frozen".to_string(),
            ))),
        }
    }

    /// `RevertUnfreeze`, the dual of [`Self::revert_freeze`]: only valid when
    /// the stored entry is currently an explicit `false` (i.e. it exists —
    /// an absent entry was never toggled at all).
    pub fn revert_unfreeze(&self, script: &[u8]) -> GovernanceResult<()> {
        let key = freeze_key(script);
        match self.store.read(&key)? {
            Some(v) if !decode_bool(&v) => {
                let mut batch = WriteBatch::new();
                batch.put(key, encode_bool(true));
                self.bump_frozen_count(&mut batch, 1)?;
                self.store.write_batch(batch)?;
                Ok(())
            }
            _ => Err(Box::new(ErrorKind::CorruptState(
                "RevertUnfreeze called but script was not unfrozen".to_string(),
            ))),
        }
    }

    /// `CanSend(s)` (spec.md §4.7): true iff `s` is absent OR stored false.
    pub fn can_send(&self, script: &[u8]) -> GovernanceResult<bool> {
        match self.store.read(&freeze_key(script))? {
            None => Ok(true),
            Some(v) => Ok(!decode_bool(&v)),
        }
    }

    pub fn number_of_frozen_scripts(&self) -> GovernanceResult<u32> {
        Ok(self
            .store
            .read(&[TAG_FROZEN_COUNT])?
            .map(|v| {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&v[..4]);
                u32::from_be_bytes(buf)
            })
            .unwrap_or(0))
    }

    fn bump_frozen_count(&self, batch: &mut WriteBatch, delta: i64) -> GovernanceResult<()> {
        let current = self.number_of_frozen_scripts()? as i64;
        let next = (current + delta).max(0) as u32;
        batch.put(vec![TAG_FROZEN_COUNT], next.to_be_bytes().to_vec());
        Ok(())
    }

    /// `UpdateCost` (spec.md §4.7): appends a new cost entry.
    pub fn update_cost(&self, cost_type: CostType, height: u32, amount: Amount) -> GovernanceResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(cost_key(cost_type, height), encode_amount(amount));
        self.store.write_batch(batch)?;
        Ok(())
    }

    pub fn revert_cost(&self, cost_type: CostType, height: u32) -> GovernanceResult<()> {
        self.store.erase(&cost_key(cost_type, height))?;
        Ok(())
    }

    /// `GetCost(t)` (spec.md §4.7): the entry with the greatest height for
    /// `cost_type`. Readers iterate with a prefix seek and keep the maximum.
    pub fn get_cost(&self, cost_type: CostType) -> GovernanceResult<Option<Amount>> {
        let entries = self.store.iter_prefix(&cost_type_prefix(cost_type))?;
        Ok(entries
            .iter()
            .max_by_key(|(k, _)| height_suffix(k))
            .and_then(|(_, v)| decode_amount(v)))
    }

    pub fn update_fee_script(&self, height: u32, script: &[u8]) -> GovernanceResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(fee_address_key(height), encode_script(script));
        self.store.write_batch(batch)?;
        Ok(())
    }

    pub fn revert_fee_script(&self, height: u32) -> GovernanceResult<()> {
        self.store.erase(&fee_address_key(height))?;
        Ok(())
    }

    /// `GetFeeScript()` (spec.md §4.7): the script with the greatest height.
    pub fn get_fee_script(&self) -> GovernanceResult<Option<Vec<u8>>> {
        let entries = self.store.iter_prefix(&[TAG_FEE_ADDRESS])?;
        Ok(entries
            .iter()
            .max_by_key(|(k, _)| height_suffix(k))
            .map(|(_, v)| decode_script(v)))
    }
}

/// Extracts the trailing big-endian `u32` height from a composite key,
/// assuming the height is always the key's last four bytes (true for both
/// `cost_key` and `fee_address_key`).
fn height_suffix(key: &[u8]) -> u32 {
    if key.len() < 4 {
        return 0;
    }
    let tail = &key[key.len() - 4..];
    u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store_with_genesis() -> GovernanceStore<MemoryStore> {
        let gov = GovernanceStore::new(MemoryStore::new());
        gov.init_genesis(&ChainParams::mainnet()).unwrap();
        gov
    }

    /// S4: freeze then unfreeze.
    #[test]
    fn freeze_toggle_updates_count_and_can_send() {
        let gov = store_with_genesis();
        let script = b"pay-to-something".to_vec();

        gov.freeze_script(&script).unwrap();
        assert!(!gov.can_send(&script).unwrap());
        assert_eq!(gov.number_of_frozen_scripts().unwrap(), 1);

        gov.unfreeze_script(&script).unwrap();
        assert_eq!(gov.number_of_frozen_scripts().unwrap(), 0);
        assert!(gov.can_send(&script).unwrap());
    }

    /// S5: revert freeze, then reverting again is corruption.
    #[test]
    fn revert_freeze_is_a_single_step_inverse() {
        let gov = store_with_genesis();
        let script = b"another-script".to_vec();

        gov.freeze_script(&script).unwrap();
        gov.revert_freeze(&script).unwrap();
        assert_eq!(gov.number_of_frozen_scripts().unwrap(), 0);
        assert!(gov.can_send(&script).unwrap());

        let err = gov.revert_freeze(&script).unwrap_err();
        assert!(matches!(*err, ErrorKind::CorruptState(_)));
    }

    #[test]
    fn unfrozen_script_can_always_send() {
        let gov = store_with_genesis();
        assert!(gov.can_send(b"never touched").unwrap());
    }

    #[test]
    fn cost_lookup_returns_the_highest_height_entry() {
        let gov = store_with_genesis();
        let base = gov.get_cost(CostType::Root).unwrap().unwrap();
        assert_eq!(base, ChainParams::mainnet().root_fee);

        let bumped = Amount::new(base.units() * 2).unwrap();
        gov.update_cost(CostType::Root, 100, bumped).unwrap();
        assert_eq!(gov.get_cost(CostType::Root).unwrap().unwrap(), bumped);
    }

    #[test]
    fn sub_and_reissue_cost_types_stay_on_their_own_fee_fields() {
        let params = ChainParams::mainnet();
        let gov = store_with_genesis();
        assert_eq!(gov.get_cost(CostType::Sub).unwrap().unwrap(), params.sub_fee);
        assert_eq!(gov.get_cost(CostType::Reissue).unwrap().unwrap(), params.reissue_fee);
    }

    #[test]
    fn fee_script_lookup_returns_latest_height() {
        let gov = store_with_genesis();
        gov.update_fee_script(10, b"script-a").unwrap();
        gov.update_fee_script(20, b"script-b").unwrap();
        assert_eq!(gov.get_fee_script().unwrap().unwrap(), b"script-b".to_vec());
    }
}
