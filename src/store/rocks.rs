//! RocksDB-backed `KvStore`, feature-gated behind `rocksdb-backend` (on by
//! default). This is the production backend; [`super::memory::MemoryStore`]
//! stands in for it in tests and embedded builds that disable the feature.

use std::path::Path;

use rocksdb::{Options, DB};

use super::{ErrorKind, KvStore, StoreResult, WriteBatch, WriteOp};

pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).map_err(|e| Box::new(ErrorKind::Backend(e.to_string())))?;
        Ok(RocksStore { db })
    }
}

impl KvStore for RocksStore {
    fn read(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| Box::new(ErrorKind::Backend(e.to_string())))
    }

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.db.iterator(rocksdb::IteratorMode::Start).next().is_none())
    }

    fn iter_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.db.prefix_iterator(prefix) {
            let (key, value) = item.map_err(|e| Box::new(ErrorKind::Backend(e.to_string())))?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut rocks_batch = rocksdb::WriteBatch::default();
        for op in batch.ops() {
            match op {
                WriteOp::Put(k, v) => rocks_batch.put(k, v),
                WriteOp::Delete(k) => rocks_batch.delete(k),
            }
        }
        self.db
            .write(rocks_batch)
            .map_err(|e| Box::new(ErrorKind::Backend(e.to_string())))
    }

    fn sync(&self) -> StoreResult<()> {
        let mut opts = rocksdb::FlushOptions::default();
        opts.set_wait(true);
        self.db
            .flush_opt(&opts)
            .map_err(|e| Box::new(ErrorKind::Backend(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KvStore;

    #[test]
    fn opens_and_round_trips_through_a_temp_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();

        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"v".to_vec());
        store.write_batch(batch).unwrap();

        assert_eq!(store.read(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(!store.is_empty().unwrap());
    }
}
