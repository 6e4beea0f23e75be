//! RocksDB storage backend.
//!
//! Each [`Table`] maps to its own column family. Batches are written with `sync`, so a
//! committed deletion step or head update survives a crash of the whole machine.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options,
    WriteBatch, WriteOptions,
};

use crate::api::{
    ALL_TABLES, Error, PrefixResult, StorageBackend, StorageReadView, StorageWriteBatch, Table,
};

type Db = DBWithThreadMode<MultiThreaded>;

fn cf_name(table: Table) -> &'static str {
    match table {
        Table::BlockHeaders => "block_headers",
        Table::BlockBodies => "block_bodies",
        Table::BlockInfos => "block_infos",
        Table::Receipts => "receipts",
        Table::States => "states",
    }
}

fn column_family(db: &Db, table: Table) -> Result<Arc<BoundColumnFamily<'_>>, Error> {
    db.cf_handle(cf_name(table))
        .ok_or_else(|| format!("column family {} not found", cf_name(table)).into())
}

/// RocksDB storage backend. Clones share the same database.
#[derive(Clone)]
pub struct RocksDBBackend {
    db: Arc<Db>,
}

impl RocksDBBackend {
    /// Opens the database at `path`, creating it and any missing column family.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = ALL_TABLES
            .iter()
            .map(|table| ColumnFamilyDescriptor::new(cf_name(*table), Options::default()));
        let db = Db::open_cf_descriptors(&opts, path, descriptors)?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl StorageBackend for RocksDBBackend {
    fn begin_read(&self) -> Result<Box<dyn StorageReadView + '_>, Error> {
        Ok(Box::new(RocksDBReadView { db: &self.db }))
    }

    fn begin_write(&self) -> Result<Box<dyn StorageWriteBatch + 'static>, Error> {
        Ok(Box::new(RocksDBWriteBatch {
            db: Arc::clone(&self.db),
            batch: WriteBatch::default(),
        }))
    }
}

struct RocksDBReadView<'a> {
    db: &'a Db,
}

impl StorageReadView for RocksDBReadView<'_> {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let cf = column_family(self.db, table)?;
        Ok(self.db.get_cf(&cf, key)?)
    }

    fn prefix_iterator(
        &self,
        table: Table,
        prefix: &[u8],
    ) -> Result<Box<dyn Iterator<Item = PrefixResult> + '_>, Error> {
        let cf = column_family(self.db, table)?;
        // Without a prefix extractor the iterator only seeks, so stop at the first key
        // outside the prefix.
        let prefix = prefix.to_vec();
        let iter = self
            .db
            .prefix_iterator_cf(&cf, &prefix)
            .map(|entry| entry.map_err(Error::from))
            .take_while(move |entry| match entry {
                Ok((key, _)) => key.starts_with(&prefix),
                Err(_) => true,
            });
        Ok(Box::new(iter))
    }
}

struct RocksDBWriteBatch {
    db: Arc<Db>,
    batch: WriteBatch,
}

impl StorageWriteBatch for RocksDBWriteBatch {
    fn put_batch(&mut self, table: Table, batch: Vec<(Vec<u8>, Vec<u8>)>) -> Result<(), Error> {
        let cf = column_family(&self.db, table)?;
        for (key, value) in batch {
            self.batch.put_cf(&cf, key, value);
        }
        Ok(())
    }

    fn delete_batch(&mut self, table: Table, keys: Vec<Vec<u8>>) -> Result<(), Error> {
        let cf = column_family(&self.db, table)?;
        for key in keys {
            self.batch.delete_cf(&cf, key);
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), Error> {
        let mut options = WriteOptions::default();
        options.set_sync(true);
        self.db.write_opt(self.batch, &options)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::run_backend_tests;
    use tempfile::tempdir;

    #[test]
    fn test_rocksdb_backend() {
        let dir = tempdir().unwrap();
        let backend = RocksDBBackend::open(dir.path()).unwrap();
        run_backend_tests(&backend);
    }

    #[test]
    fn test_levels_and_pointers_survive_reopen() {
        let dir = tempdir().unwrap();
        let level_key = 7u64.to_be_bytes().to_vec();
        let pointer_key = vec![0xff; 32];

        {
            let backend = RocksDBBackend::open(dir.path()).unwrap();
            let mut batch = backend.begin_write().unwrap();
            batch
                .put_batch(Table::BlockInfos, vec![(level_key.clone(), b"level".to_vec())])
                .unwrap();
            batch
                .put_batch(Table::BlockInfos, vec![(pointer_key.clone(), vec![0x42; 32])])
                .unwrap();
            batch.commit().unwrap();
        }

        let backend = RocksDBBackend::open(dir.path()).unwrap();
        let view = backend.begin_read().unwrap();
        assert_eq!(
            view.get(Table::BlockInfos, &level_key).unwrap(),
            Some(b"level".to_vec())
        );
        assert_eq!(
            view.get(Table::BlockInfos, &pointer_key).unwrap(),
            Some(vec![0x42; 32])
        );
    }

    #[test]
    fn test_uncommitted_batch_is_lost_on_reopen() {
        let dir = tempdir().unwrap();
        {
            let backend = RocksDBBackend::open(dir.path()).unwrap();
            let mut batch = backend.begin_write().unwrap();
            batch
                .put_batch(Table::States, vec![(vec![1; 32], b"state".to_vec())])
                .unwrap();
        }

        let backend = RocksDBBackend::open(dir.path()).unwrap();
        let view = backend.begin_read().unwrap();
        assert_eq!(view.get(Table::States, &[1; 32]).unwrap(), None);
    }
}
