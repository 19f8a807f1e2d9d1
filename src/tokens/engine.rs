//! The token engine proper (C6): issuance, reissue, transfer, balance
//! queries, and the block-connect/disconnect lifecycle that turns a block's
//! staged [`super::cache::DirtyLayer`] into persisted writes (or undoes it).
//! Grounded the same way `GovernanceStore` (C7) is grounded: owns a
//! [`KvStore`] handle by composition rather than inheriting from one
//! (spec.md §9), and layers an [`LruMetadataCache`] in front of it for hot
//! metadata reads (spec.md §4.6 "metadata reads are LRU-accelerated", §4.8).

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::amount::{Amount, MAX_MONEY};
use crate::cache::LruMetadataCache;
use crate::store::{append_length_prefixed, KvStore, WriteBatch};

use super::cache::DirtyLayer;
use super::error::{ErrorKind, TokenResult};
use super::metadata::{self, TokenMetadata};

const TAG_METADATA: u8 = b'T';
const TAG_BALANCE: u8 = b'B';

fn metadata_key(name: &str) -> Vec<u8> {
    let mut key = vec![TAG_METADATA];
    key.extend_from_slice(name.as_bytes());
    key
}

fn balance_prefix(name: &str) -> Vec<u8> {
    let mut key = vec![TAG_BALANCE];
    append_length_prefixed(&mut key, name.as_bytes());
    key
}

fn balance_key(name: &str, address: &str) -> Vec<u8> {
    let mut key = balance_prefix(name);
    key.extend_from_slice(address.as_bytes());
    key
}

/// Recovers `(name, address)` from a balance-family key, the inverse of
/// [`balance_key`]. Used by the wallet-facing directory scan.
fn decode_balance_key(key: &[u8]) -> Option<(String, String)> {
    if key.first() != Some(&TAG_BALANCE) || key.len() < 5 {
        return None;
    }
    let rest = &key[1..];
    let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
    let name = rest.get(4..4 + len)?;
    let address = rest.get(4 + len..)?;
    Some((String::from_utf8_lossy(name).to_string(), String::from_utf8_lossy(address).to_string()))
}

fn encode_metadata(metadata: &TokenMetadata) -> Vec<u8> {
    bincode::serialize(metadata).expect("token metadata always serializes")
}

fn decode_metadata(bytes: &[u8]) -> Option<TokenMetadata> {
    bincode::deserialize(bytes).ok()
}

fn encode_amount(v: i64) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}

fn decode_amount(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    if bytes.len() == 8 {
        buf.copy_from_slice(bytes);
    }
    i64::from_be_bytes(buf)
}

/// Everything needed to undo one block's worth of token state
/// (`disconnect_block`'s input, `connect_block`'s output) without re-reading
/// every value the block touched from the live store.
#[derive(Debug, Default, Clone)]
pub struct TokenBlockUndo {
    created_metadata: Vec<String>,
    prior_metadata: Vec<(String, TokenMetadata)>,
    balance_deltas: Vec<(String, String, i64)>,
}

pub struct TokenEngine<S: KvStore> {
    store: S,
    cache: Mutex<LruMetadataCache<String, TokenMetadata>>,
    dirty: Mutex<DirtyLayer>,
}

impl<S: KvStore> TokenEngine<S> {
    pub fn new(store: S, metadata_cache_size: usize) -> Self {
        TokenEngine {
            store,
            cache: Mutex::new(LruMetadataCache::new(metadata_cache_size)),
            dirty: Mutex::new(DirtyLayer::default()),
        }
    }

    fn read_balance(&self, name: &str, address: &str) -> TokenResult<i64> {
        Ok(self.store.read(&balance_key(name, address))?.map(|b| decode_amount(&b)).unwrap_or(0))
    }

    /// `GetTokenMetaDataIfExists` (spec.md §4.6): checks the in-progress
    /// dirty layer first (so a sub-token issued earlier in the same block
    /// is visible to a later transaction in that block), then the LRU
    /// cache, then the store.
    pub fn get_token_metadata_if_exists(&self, name: &str) -> TokenResult<Option<TokenMetadata>> {
        {
            let dirty = self.dirty.lock();
            if let Some((_, after)) = dirty.reissues.get(name) {
                return Ok(Some(after.clone()));
            }
            if let Some(meta) = dirty.new_issues.get(name) {
                return Ok(Some(meta.clone()));
            }
        }
        {
            let mut cache = self.cache.lock();
            if let Some(meta) = cache.get(&name.to_string()) {
                return Ok(Some(meta.clone()));
            }
        }
        match self.store.read(&metadata_key(name))? {
            Some(bytes) => {
                let meta = decode_metadata(&bytes);
                if let Some(ref meta) = meta {
                    self.cache.lock().put(name.to_string(), meta.clone());
                }
                Ok(meta)
            }
            None => Ok(None),
        }
    }

    /// Balance including this block's not-yet-committed delta, the view a
    /// transaction validating against its own block must see.
    pub fn get_balance(&self, name: &str, address: &str) -> TokenResult<i64> {
        let base = self.read_balance(name, address)?;
        let delta = self
            .dirty
            .lock()
            .balance_deltas
            .get(&(name.to_string(), address.to_string()))
            .copied()
            .unwrap_or(0);
        Ok(base + delta)
    }

    fn stage_issue(
        &self,
        name: &str,
        amount: i64,
        units: u8,
        reissuable: bool,
        recipient_address: &str,
        mint_owner_token: bool,
    ) -> TokenResult<()> {
        if self.get_token_metadata_if_exists(name)?.is_some() {
            return Err(Box::new(ErrorKind::DuplicateIssue(name.to_string())));
        }
        if !(0..=MAX_MONEY).contains(&amount) {
            return Err(Box::new(ErrorKind::AmountOutOfRange));
        }

        let meta = TokenMetadata { name: name.to_string(), total_amount: amount, units, reissuable };
        let mut dirty = self.dirty.lock();
        dirty.new_issues.insert(name.to_string(), meta);
        *dirty.balance_deltas.entry((name.to_string(), recipient_address.to_string())).or_insert(0) +=
            amount;

        if mint_owner_token {
            let owner_name = metadata::owner_token_name(name);
            drop(dirty);
            if self.get_token_metadata_if_exists(&owner_name)?.is_none() {
                let owner_meta =
                    TokenMetadata { name: owner_name.clone(), total_amount: 1, units: 0, reissuable: false };
                let mut dirty = self.dirty.lock();
                dirty.new_issues.insert(owner_name.clone(), owner_meta);
                *dirty
                    .balance_deltas
                    .entry((owner_name, recipient_address.to_string()))
                    .or_insert(0) += 1;
            }
        }
        Ok(())
    }

    /// `IssueRoot` (spec.md §4.6): mints `amount` of a new top-level token
    /// and a paired owner token (`NAME!`), both credited to
    /// `issuer_address`.
    pub fn issue_root(
        &self,
        name: &str,
        amount: i64,
        units: u8,
        reissuable: bool,
        issuer_address: &str,
        fee_paid: Amount,
        required_fee: Amount,
    ) -> TokenResult<()> {
        metadata::validate_root_name(name)?;
        self.check_fee(fee_paid, required_fee)?;
        self.stage_issue(name, amount, units, reissuable, issuer_address, true)
    }

    /// `IssueSub` (spec.md §4.6): as [`Self::issue_root`] but for a
    /// `ROOT/SUB` name; requires the caller to have already verified the
    /// root's owner token was consumed as an input (out of scope here).
    pub fn issue_sub(
        &self,
        full_name: &str,
        amount: i64,
        units: u8,
        reissuable: bool,
        issuer_address: &str,
        owner_token_consumed: bool,
        fee_paid: Amount,
        required_fee: Amount,
    ) -> TokenResult<()> {
        metadata::validate_sub_name(full_name)?;
        if !owner_token_consumed {
            return Err(Box::new(ErrorKind::OwnerTokenRequired(full_name.to_string())));
        }
        self.check_fee(fee_paid, required_fee)?;
        self.stage_issue(full_name, amount, units, reissuable, issuer_address, true)
    }

    /// `IssueUnique` (spec.md §4.6): mints exactly one indivisible unit of a
    /// `ROOT#tag` token; no owner token is minted for it.
    pub fn issue_unique(
        &self,
        full_name: &str,
        issuer_address: &str,
        owner_token_consumed: bool,
        fee_paid: Amount,
        required_fee: Amount,
    ) -> TokenResult<()> {
        let (root, _tag) = metadata::validate_unique_name(full_name)?;
        if !owner_token_consumed {
            return Err(Box::new(ErrorKind::OwnerTokenRequired(root)));
        }
        self.check_fee(fee_paid, required_fee)?;
        self.stage_issue(full_name, 1, 0, false, issuer_address, false)
    }

    /// `IssueUsername` (spec.md §4.6): mints exactly one indivisible unit
    /// of a `~name` token; no owner token, no root dependency.
    pub fn issue_username(
        &self,
        full_name: &str,
        issuer_address: &str,
        fee_paid: Amount,
        required_fee: Amount,
    ) -> TokenResult<()> {
        metadata::validate_username(full_name)?;
        self.check_fee(fee_paid, required_fee)?;
        self.stage_issue(full_name, 1, 0, false, issuer_address, false)
    }

    fn check_fee(&self, fee_paid: Amount, required_fee: Amount) -> TokenResult<()> {
        if fee_paid.units() < required_fee.units() {
            return Err(Box::new(ErrorKind::InsufficientFee {
                required: required_fee.units(),
                paid: fee_paid.units(),
            }));
        }
        Ok(())
    }

    /// `ReissueToken` (spec.md §4.6): requires the token's owner token to
    /// have been consumed as an input, the token to currently be
    /// reissuable, and `units`/`reissuable` to only ever move in the
    /// permitted direction (units may rise, reissuable may only go from
    /// true to false).
    pub fn reissue(
        &self,
        name: &str,
        amount_increase: i64,
        units: u8,
        reissuable: bool,
        recipient_address: &str,
        owner_token_consumed: bool,
        fee_paid: Amount,
        required_fee: Amount,
    ) -> TokenResult<()> {
        if !owner_token_consumed {
            return Err(Box::new(ErrorKind::OwnerTokenRequired(name.to_string())));
        }
        self.check_fee(fee_paid, required_fee)?;

        let current = self
            .get_token_metadata_if_exists(name)?
            .ok_or_else(|| Box::new(ErrorKind::UnknownToken(name.to_string())))?;
        if !current.reissuable {
            return Err(Box::new(ErrorKind::NotReissuable(name.to_string())));
        }
        if units < current.units {
            return Err(Box::new(ErrorKind::UnitsMayOnlyIncrease {
                name: name.to_string(),
                current: current.units,
                requested: units,
            }));
        }
        if amount_increase < 0 {
            return Err(Box::new(ErrorKind::AmountOutOfRange));
        }

        let new_total = current
            .total_amount
            .checked_add(amount_increase)
            .ok_or_else(|| Box::new(ErrorKind::AmountOutOfRange))?;
        if !(0..=MAX_MONEY).contains(&new_total) {
            return Err(Box::new(ErrorKind::AmountOutOfRange));
        }

        let new_meta = TokenMetadata { name: name.to_string(), total_amount: new_total, units, reissuable };

        let mut dirty = self.dirty.lock();
        dirty.reissues.insert(name.to_string(), (current, new_meta));
        *dirty.balance_deltas.entry((name.to_string(), recipient_address.to_string())).or_insert(0) +=
            amount_increase;
        Ok(())
    }

    /// `TransferToken` (spec.md §4.6): moves `amount` of `name` from
    /// `from_address` to `to_address`. Whether the output is spendable
    /// given `token_lock_time` is a consensus-layer concern the caller
    /// enforces at the UTXO boundary (spec.md §1); this only logs the
    /// lock so the balance bookkeeping and the spendability rule can't
    /// silently disagree about whether a lock was present.
    pub fn transfer(
        &self,
        name: &str,
        amount: i64,
        from_address: &str,
        to_address: &str,
        token_lock_time: u32,
        unlocked: bool,
    ) -> TokenResult<()> {
        self.get_token_metadata_if_exists(name)?
            .ok_or_else(|| Box::new(ErrorKind::UnknownToken(name.to_string())))?;

        let have = self.get_balance(name, from_address)?;
        if have < amount {
            return Err(Box::new(ErrorKind::InsufficientBalance {
                name: name.to_string(),
                have,
                want: amount,
            }));
        }

        let mut dirty = self.dirty.lock();
        *dirty.balance_deltas.entry((name.to_string(), from_address.to_string())).or_insert(0) -= amount;
        *dirty.balance_deltas.entry((name.to_string(), to_address.to_string())).or_insert(0) += amount;
        drop(dirty);

        if token_lock_time > 0 && !unlocked {
            debug!(name, token_lock_time, "token transfer output is locked until its threshold");
        }
        Ok(())
    }

    /// Commits the block's staged [`DirtyLayer`] as one atomic write batch
    /// and returns the undo record needed to reverse it, mirroring
    /// `GovernanceStore`'s forward/inverse pairing (spec.md §4.7) applied to
    /// token state.
    pub fn connect_block(&self) -> TokenResult<TokenBlockUndo> {
        let mut dirty = self.dirty.lock();
        let mut batch = WriteBatch::new();
        let mut undo = TokenBlockUndo::default();

        for (name, meta) in dirty.new_issues.iter() {
            batch.put(metadata_key(name), encode_metadata(meta));
            undo.created_metadata.push(name.clone());
        }
        for (name, (before, after)) in dirty.reissues.iter() {
            batch.put(metadata_key(name), encode_metadata(after));
            undo.prior_metadata.push((name.clone(), before.clone()));
        }

        let mut resolved = HashMap::new();
        for ((name, address), delta) in dirty.balance_deltas.iter() {
            let current = self.read_balance(name, address)?;
            let next = current + delta;
            if next < 0 {
                return Err(Box::new(ErrorKind::InsufficientBalance {
                    name: name.clone(),
                    have: current,
                    want: -delta,
                }));
            }
            resolved.insert((name.clone(), address.clone()), next);
            undo.balance_deltas.push((name.clone(), address.clone(), *delta));
        }
        for ((name, address), next) in resolved {
            if next == 0 {
                batch.delete(balance_key(&name, &address));
            } else {
                batch.put(balance_key(&name, &address), encode_amount(next));
            }
        }

        self.store.write_batch(batch)?;

        let mut cache = self.cache.lock();
        for (name, meta) in dirty.new_issues.iter() {
            cache.put(name.clone(), meta.clone());
        }
        for (name, (_, after)) in dirty.reissues.iter() {
            cache.put(name.clone(), after.clone());
        }
        drop(cache);

        dirty.clear();
        Ok(undo)
    }

    /// Reverses a previously committed block's token effects, the
    /// reorg-safety counterpart to [`Self::connect_block`].
    pub fn disconnect_block(&self, undo: &TokenBlockUndo) -> TokenResult<()> {
        let mut batch = WriteBatch::new();

        for (name, address, delta) in &undo.balance_deltas {
            let current = self.read_balance(name, address)?;
            let next = current - delta;
            if next <= 0 {
                batch.delete(balance_key(name, address));
            } else {
                batch.put(balance_key(name, address), encode_amount(next));
            }
        }
        for (name, prior) in &undo.prior_metadata {
            batch.put(metadata_key(name), encode_metadata(prior));
        }
        for name in &undo.created_metadata {
            batch.delete(metadata_key(name));
        }

        self.store.write_batch(batch)?;

        let mut cache = self.cache.lock();
        for name in &undo.created_metadata {
            cache.erase(name);
        }
        for (name, prior) in &undo.prior_metadata {
            cache.put(name.clone(), prior.clone());
        }
        Ok(())
    }

    /// `AddressDir` (spec.md §4.6): a paginated listing of every
    /// `(address, balance)` pair holding a positive balance of `name`,
    /// ordered by the store's native key order.
    pub fn address_dir(&self, name: &str, start: usize, count: usize) -> TokenResult<(Vec<(String, i64)>, usize)> {
        let prefix = balance_prefix(name);
        let entries = self.store.iter_prefix(&prefix)?;
        let total = entries.len();
        let page = entries
            .into_iter()
            .skip(start)
            .take(count)
            .filter_map(|(key, value)| {
                let address = String::from_utf8_lossy(&key[prefix.len()..]).to_string();
                Some((address, decode_amount(&value)))
            })
            .collect();
        Ok((page, total))
    }

    /// `GetAllMyTokenBalances` (spec.md §4.6): every `(name, balance)` an
    /// address in `addresses` holds, optionally narrowed to tokens whose
    /// name matches `filter` (an exact name, or a `PREFIX*` wildcard).
    pub fn get_all_my_token_balances(
        &self,
        addresses: &[String],
        filter: Option<&str>,
    ) -> TokenResult<HashMap<(String, String), i64>> {
        let mut out = HashMap::new();
        for (key, value) in self.store.iter_prefix(&[TAG_BALANCE])? {
            let Some((name, address)) = decode_balance_key(&key) else { continue };
            if !addresses.iter().any(|a| a == &address) {
                continue;
            }
            if let Some(pattern) = filter {
                let matches = match pattern.strip_suffix('*') {
                    Some(stem) => name.starts_with(stem),
                    None => name == pattern,
                };
                if !matches {
                    continue;
                }
            }
            let amount = decode_amount(&value);
            if amount > 0 {
                out.insert((name, address), amount);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn engine() -> TokenEngine<MemoryStore> {
        TokenEngine::new(MemoryStore::new(), 64)
    }

    const FEE: Amount = Amount::ZERO;

    /// S1: issuing `SERIALIZATION` mints both the token and its paired
    /// `SERIALIZATION!` owner token to the same address.
    #[test]
    fn issuing_a_root_token_mints_its_owner_token_too() {
        let engine = engine();
        let addr = "mfe7MqgYZgBuXzrT2QTFqZwBXwRDqagHTp";
        engine.issue_root("SERIALIZATION", 1, 8, true, addr, FEE, FEE).unwrap();
        engine.connect_block().unwrap();

        let meta = engine.get_token_metadata_if_exists("SERIALIZATION").unwrap().unwrap();
        assert_eq!(meta.total_amount, 1);
        assert_eq!(meta.units, 8);
        assert!(meta.reissuable);

        let owner = engine.get_token_metadata_if_exists("SERIALIZATION!").unwrap().unwrap();
        assert_eq!(owner.total_amount, 1);
        assert_eq!(engine.get_balance("SERIALIZATION!", addr).unwrap(), 1);
        assert_eq!(engine.get_balance("SERIALIZATION", addr).unwrap(), 1);
    }

    #[test]
    fn duplicate_issue_is_rejected() {
        let engine = engine();
        engine.issue_root("DUP", 10, 0, false, "addr-a", FEE, FEE).unwrap();
        engine.connect_block().unwrap();
        let err = engine.issue_root("DUP", 1, 0, false, "addr-b", FEE, FEE).unwrap_err();
        assert!(matches!(*err, ErrorKind::DuplicateIssue(_)));
    }

    #[test]
    fn reissue_requires_owner_token_and_raises_total() {
        let engine = engine();
        engine.issue_root("REISSUABLE", 100, 4, true, "issuer", FEE, FEE).unwrap();
        engine.connect_block().unwrap();

        engine.reissue("REISSUABLE", 50, 4, true, "issuer", true, FEE, FEE).unwrap();
        engine.connect_block().unwrap();

        let meta = engine.get_token_metadata_if_exists("REISSUABLE").unwrap().unwrap();
        assert_eq!(meta.total_amount, 150);
        assert_eq!(engine.get_balance("REISSUABLE", "issuer").unwrap(), 150);
    }

    #[test]
    fn reissue_without_owner_token_is_rejected() {
        let engine = engine();
        engine.issue_root("NOOWNER", 100, 0, true, "issuer", FEE, FEE).unwrap();
        engine.connect_block().unwrap();

        let err = engine.reissue("NOOWNER", 1, 0, true, "issuer", false, FEE, FEE).unwrap_err();
        assert!(matches!(*err, ErrorKind::OwnerTokenRequired(_)));
    }

    #[test]
    fn reissue_cannot_lower_units_or_restore_reissuability() {
        let engine = engine();
        engine.issue_root("SHRINK", 100, 4, true, "issuer", FEE, FEE).unwrap();
        engine.connect_block().unwrap();

        let err = engine.reissue("SHRINK", 0, 2, true, "issuer", true, FEE, FEE).unwrap_err();
        assert!(matches!(*err, ErrorKind::UnitsMayOnlyIncrease { .. }));

        engine.reissue("SHRINK", 0, 4, false, "issuer", true, FEE, FEE).unwrap();
        engine.connect_block().unwrap();
        // Once reissuable is turned off, the token can never be reissued
        // again at all, regardless of what `reissuable` the caller now asks
        // for — the same `NotReissuable` gate a first-time reissue attempt
        // on a non-reissuable token would hit.
        let err = engine.reissue("SHRINK", 0, 4, true, "issuer", true, FEE, FEE).unwrap_err();
        assert!(matches!(*err, ErrorKind::NotReissuable(_)));
    }

    #[test]
    fn reissue_rejects_negative_amount_increase() {
        let engine = engine();
        engine.issue_root("NEG", 100, 0, true, "issuer", FEE, FEE).unwrap();
        engine.connect_block().unwrap();

        let err = engine.reissue("NEG", -10, 0, true, "issuer", true, FEE, FEE).unwrap_err();
        assert!(matches!(*err, ErrorKind::AmountOutOfRange));
    }

    #[test]
    fn transfer_moves_balance_and_rejects_overspend() {
        let engine = engine();
        engine.issue_root("XFER", 100, 0, false, "alice", FEE, FEE).unwrap();
        engine.connect_block().unwrap();

        engine.transfer("XFER", 40, "alice", "bob", 0, true).unwrap();
        engine.connect_block().unwrap();
        assert_eq!(engine.get_balance("XFER", "alice").unwrap(), 60);
        assert_eq!(engine.get_balance("XFER", "bob").unwrap(), 40);

        let err = engine.transfer("XFER", 1000, "bob", "alice", 0, true).unwrap_err();
        assert!(matches!(*err, ErrorKind::InsufficientBalance { .. }));
    }

    #[test]
    fn disconnect_block_undoes_issue_and_transfer_exactly() {
        let engine = engine();
        engine.issue_root("UNDO", 100, 0, false, "alice", FEE, FEE).unwrap();
        let undo = engine.connect_block().unwrap();
        engine.transfer("UNDO", 30, "alice", "bob", 0, true).unwrap();
        let transfer_undo = engine.connect_block().unwrap();

        engine.disconnect_block(&transfer_undo).unwrap();
        assert_eq!(engine.get_balance("UNDO", "alice").unwrap(), 100);
        assert_eq!(engine.get_balance("UNDO", "bob").unwrap(), 0);

        engine.disconnect_block(&undo).unwrap();
        assert!(engine.get_token_metadata_if_exists("UNDO").unwrap().is_none());
        assert_eq!(engine.get_balance("UNDO", "alice").unwrap(), 0);
    }

    #[test]
    fn unique_token_issue_requires_root_owner_token_and_mints_no_owner_of_its_own() {
        let engine = engine();
        engine.issue_unique("SERIALIZATION#first", "issuer", true, FEE, FEE).unwrap();
        engine.connect_block().unwrap();

        let meta = engine.get_token_metadata_if_exists("SERIALIZATION#first").unwrap().unwrap();
        assert_eq!(meta.total_amount, 1);
        assert!(engine.get_token_metadata_if_exists("SERIALIZATION#first!").unwrap().is_none());

        let err = engine.issue_unique("SERIALIZATION#second", "issuer", false, FEE, FEE).unwrap_err();
        assert!(matches!(*err, ErrorKind::OwnerTokenRequired(_)));
    }

    #[test]
    fn address_dir_paginates_holders_of_a_token() {
        let engine = engine();
        engine.issue_root("DIR", 300, 0, false, "alice", FEE, FEE).unwrap();
        engine.connect_block().unwrap();
        engine.transfer("DIR", 100, "alice", "bob", 0, true).unwrap();
        engine.connect_block().unwrap();

        let (page, total) = engine.address_dir("DIR", 0, 10).unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn insufficient_fee_blocks_issuance() {
        let engine = engine();
        let required = Amount::new(500).unwrap();
        let err = engine.issue_root("NOFEE", 1, 0, false, "issuer", FEE, required).unwrap_err();
        assert!(matches!(*err, ErrorKind::InsufficientFee { .. }));
    }
}
