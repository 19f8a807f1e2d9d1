//! Ordered key/value persistence façade (C9, spec.md §4.9/§6). A trait-based
//! store with two backends: [`memory::MemoryStore`] (a `BTreeMap`, always
//! available, used by every unit test) and [`rocks::RocksStore`]
//! (feature-gated `rocksdb-backend`, on by default) — the shape
//! `qubitcoin-storage`'s manifest names and SPEC_FULL.md §2 "Persistence"
//! commits to. The teacher has no real KV layer (`BlockchainDB` is an
//! in-memory `Vec<Block>` serialized wholesale with `bincode`), so this
//! module has no teacher precedent beyond the "explicit schema, no inherited
//! wrapper" instruction in spec.md §9.

pub mod error;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;

pub use error::{ErrorKind, StoreResult};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

/// One pending write, either a put or a delete. Collected into a
/// [`WriteBatch`] so a caller can stage many and commit them atomically.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// A set of writes applied to the store as a single atomic unit (spec.md §5:
/// "one C9 batch per block connect and per block disconnect").
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch { ops: Vec::new() }
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(WriteOp::Put(key.into(), value.into()));
        self
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(WriteOp::Delete(key.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }
}

/// The persistence façade spec.md §4.9 and §6 describe. Keys are byte
/// sequences carrying a leading tag byte that segregates entry families;
/// callers (governance, token engine) own the schema and only ask the store
/// for ordered prefix iteration and atomic batches.
pub trait KvStore: Send + Sync {
    fn read(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    fn exists(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.read(key)?.is_some())
    }

    fn erase(&self, key: &[u8]) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key.to_vec());
        self.write_batch(batch)
    }

    fn is_empty(&self) -> StoreResult<bool>;

    /// A read-only snapshot of every `(key, value)` pair whose key starts
    /// with `prefix`, in ascending lexicographic order (spec.md §4.9's
    /// "prefix seek of `tag` yields only entries of that family before a
    /// foreign tag sorts higher"). Bound to the calling thread (spec.md §5).
    fn iter_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;

    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()>;

    fn sync(&self) -> StoreResult<()>;
}

/// Appends a compact-size-free big-endian length prefix ahead of `field`,
/// the declared-order composite-key convention spec.md §4.9/§9 asks for:
/// fields appended in declared order, variable-length byte strings length
/// prefixed so a later field can't be mistaken for a continuation of this
/// one when seeking by an exact key rather than by prefix.
pub fn append_length_prefixed(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u32).to_be_bytes());
    out.extend_from_slice(field);
}

/// Lets a store be shared by value (e.g. a [`std::sync::Arc`] handed to both
/// the governance store and the token engine) without each caller needing to
/// know it's behind a pointer.
impl<T: KvStore + ?Sized> KvStore for std::sync::Arc<T> {
    fn read(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        (**self).read(key)
    }

    fn is_empty(&self) -> StoreResult<bool> {
        (**self).is_empty()
    }

    fn iter_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        (**self).iter_prefix(prefix)
    }

    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        (**self).write_batch(batch)
    }

    fn sync(&self) -> StoreResult<()> {
        (**self).sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips_and_prefix_iterates() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"a:1".to_vec(), b"one".to_vec());
        batch.put(b"a:2".to_vec(), b"two".to_vec());
        batch.put(b"b:1".to_vec(), b"other".to_vec());
        store.write_batch(batch).unwrap();

        let under_a = store.iter_prefix(b"a:").unwrap();
        assert_eq!(under_a.len(), 2);
        assert_eq!(under_a[0].0, b"a:1");
        assert_eq!(under_a[1].0, b"a:2");
    }

    #[test]
    fn erase_removes_the_key() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"v".to_vec());
        store.write_batch(batch).unwrap();
        assert!(store.exists(b"k").unwrap());

        store.erase(b"k").unwrap();
        assert!(!store.exists(b"k").unwrap());
    }
}
