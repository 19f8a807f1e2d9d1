//! In-memory `KvStore` backend over a `BTreeMap`, used by every unit test in
//! this crate and available regardless of the `rocksdb-backend` feature.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::{KvStore, StoreResult, WriteBatch, WriteOp};

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore { inner: RwLock::new(BTreeMap::new()) }
    }
}

impl KvStore for MemoryStore {
    fn read(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.inner.read().is_empty())
    }

    fn iter_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .inner
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut guard = self.inner.write();
        for op in batch.ops() {
            match op {
                WriteOp::Put(k, v) => {
                    guard.insert(k.clone(), v.clone());
                }
                WriteOp::Delete(k) => {
                    guard.remove(k);
                }
            }
        }
        Ok(())
    }

    fn sync(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_reports_empty() {
        let store = MemoryStore::new();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn batch_writes_are_all_or_nothing_visible_together() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"x".to_vec(), b"1".to_vec());
        batch.put(b"y".to_vec(), b"2".to_vec());
        store.write_batch(batch).unwrap();

        assert_eq!(store.read(b"x").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.read(b"y").unwrap(), Some(b"2".to_vec()));
    }
}
