//! Shared tests for storage backends.
//!
//! Every [`StorageBackend`] must pass [`run_backend_tests`]. Keys follow the layouts the
//! chain store uses: 32-byte hashes, 8-byte big-endian heights, and receipt keys made of
//! a block hash followed by a big-endian index. Each test uses its own keys so the suite
//! can share one backend.

use crate::api::{StorageBackend, Table};

/// Run the full test suite against a backend.
pub fn run_backend_tests(backend: &dyn StorageBackend) {
    test_put_and_get(backend);
    test_missing_key(backend);
    test_delete(backend);
    test_ops_apply_in_order(backend);
    test_step_is_atomic_across_tables(backend);
    test_tables_are_isolated(backend);
    test_prefix_iterator(backend);
    test_prefix_iterator_key_order(backend);
}

fn hash(byte: u8) -> Vec<u8> {
    vec![byte; 32]
}

fn height(number: u64) -> Vec<u8> {
    number.to_be_bytes().to_vec()
}

fn put(backend: &dyn StorageBackend, table: Table, entries: Vec<(Vec<u8>, Vec<u8>)>) {
    let mut batch = backend.begin_write().unwrap();
    batch.put_batch(table, entries).unwrap();
    batch.commit().unwrap();
}

fn get(backend: &dyn StorageBackend, table: Table, key: &[u8]) -> Option<Vec<u8>> {
    backend.begin_read().unwrap().get(table, key).unwrap()
}

fn test_put_and_get(backend: &dyn StorageBackend) {
    put(
        backend,
        Table::BlockHeaders,
        vec![(hash(0x01), b"header".to_vec())],
    );
    put(backend, Table::BlockInfos, vec![(height(1), b"level 1".to_vec())]);

    assert_eq!(get(backend, Table::BlockHeaders, &hash(0x01)), Some(b"header".to_vec()));
    assert_eq!(get(backend, Table::BlockInfos, &height(1)), Some(b"level 1".to_vec()));
}

fn test_missing_key(backend: &dyn StorageBackend) {
    assert_eq!(get(backend, Table::BlockHeaders, &hash(0x02)), None);
    assert_eq!(get(backend, Table::BlockInfos, &height(u64::MAX)), None);
}

fn test_delete(backend: &dyn StorageBackend) {
    put(backend, Table::BlockBodies, vec![(hash(0x03), b"body".to_vec())]);

    let mut batch = backend.begin_write().unwrap();
    batch.delete_batch(Table::BlockBodies, vec![hash(0x03)]).unwrap();
    // Deleting an absent key is not an error
    batch.delete_batch(Table::BlockBodies, vec![hash(0x04)]).unwrap();
    batch.commit().unwrap();

    assert_eq!(get(backend, Table::BlockBodies, &hash(0x03)), None);
}

/// Within one batch, a later write to the same key wins.
fn test_ops_apply_in_order(backend: &dyn StorageBackend) {
    let pointer = hash(0xff);
    put(backend, Table::BlockInfos, vec![(pointer.clone(), hash(0x05))]);

    let mut batch = backend.begin_write().unwrap();
    batch.delete_batch(Table::BlockInfos, vec![pointer.clone()]).unwrap();
    batch
        .put_batch(Table::BlockInfos, vec![(pointer.clone(), hash(0x06))])
        .unwrap();
    batch.commit().unwrap();
    assert_eq!(get(backend, Table::BlockInfos, &pointer), Some(hash(0x06)));

    let mut batch = backend.begin_write().unwrap();
    batch
        .put_batch(Table::BlockInfos, vec![(pointer.clone(), hash(0x07))])
        .unwrap();
    batch.delete_batch(Table::BlockInfos, vec![pointer.clone()]).unwrap();
    batch.commit().unwrap();
    assert_eq!(get(backend, Table::BlockInfos, &pointer), None);
}

/// One deletion step: move the pointer, drop the level, the header and the body.
fn test_step_is_atomic_across_tables(backend: &dyn StorageBackend) {
    let (victim, next, pointer) = (hash(0x08), hash(0x09), hash(0xfe));
    {
        let mut batch = backend.begin_write().unwrap();
        batch
            .put_batch(Table::BlockInfos, vec![(height(8), b"level 8".to_vec())])
            .unwrap();
        batch
            .put_batch(Table::BlockHeaders, vec![(victim.clone(), b"header".to_vec())])
            .unwrap();
        batch
            .put_batch(Table::BlockBodies, vec![(victim.clone(), b"body".to_vec())])
            .unwrap();
        batch.commit().unwrap();
    }

    // Dropped without commit: nothing changes
    {
        let mut batch = backend.begin_write().unwrap();
        batch
            .put_batch(Table::BlockInfos, vec![(pointer.clone(), next.clone())])
            .unwrap();
        batch.delete_batch(Table::BlockInfos, vec![height(8)]).unwrap();
        batch.delete_batch(Table::BlockHeaders, vec![victim.clone()]).unwrap();
    }
    assert_eq!(get(backend, Table::BlockInfos, &pointer), None);
    assert!(get(backend, Table::BlockInfos, &height(8)).is_some());

    {
        let mut batch = backend.begin_write().unwrap();
        batch
            .put_batch(Table::BlockInfos, vec![(pointer.clone(), next.clone())])
            .unwrap();
        batch.delete_batch(Table::BlockInfos, vec![height(8)]).unwrap();
        batch.delete_batch(Table::BlockHeaders, vec![victim.clone()]).unwrap();
        batch.delete_batch(Table::BlockBodies, vec![victim.clone()]).unwrap();
        batch.commit().unwrap();
    }
    assert_eq!(get(backend, Table::BlockInfos, &pointer), Some(next));
    assert_eq!(get(backend, Table::BlockInfos, &height(8)), None);
    assert_eq!(get(backend, Table::BlockHeaders, &victim), None);
    assert_eq!(get(backend, Table::BlockBodies, &victim), None);
}

fn test_tables_are_isolated(backend: &dyn StorageBackend) {
    let key = hash(0x0a);
    let mut batch = backend.begin_write().unwrap();
    batch
        .put_batch(Table::BlockHeaders, vec![(key.clone(), b"header".to_vec())])
        .unwrap();
    batch
        .put_batch(Table::States, vec![(key.clone(), b"state".to_vec())])
        .unwrap();
    batch.commit().unwrap();

    assert_eq!(get(backend, Table::BlockHeaders, &key), Some(b"header".to_vec()));
    assert_eq!(get(backend, Table::States, &key), Some(b"state".to_vec()));
    assert_eq!(get(backend, Table::BlockBodies, &key), None);
}

fn test_prefix_iterator(backend: &dyn StorageBackend) {
    let block = hash(0x0b);
    let key = |index: u32| [block.as_slice(), &index.to_be_bytes()].concat();
    put(
        backend,
        Table::Receipts,
        vec![
            (key(0), b"r0".to_vec()),
            (key(1), b"r1".to_vec()),
            ([hash(0x0c).as_slice(), &0u32.to_be_bytes()].concat(), b"other".to_vec()),
        ],
    );

    let view = backend.begin_read().unwrap();
    let keys: Vec<_> = view
        .prefix_iterator(Table::Receipts, &block)
        .unwrap()
        .map(|entry| entry.unwrap().0.to_vec())
        .collect();
    assert_eq!(keys, vec![key(0), key(1)]);

    let none = view.prefix_iterator(Table::Receipts, &hash(0x0d)).unwrap().count();
    assert_eq!(none, 0);
}

fn test_prefix_iterator_key_order(backend: &dyn StorageBackend) {
    let block = hash(0xab);
    let key = |index: u32| [block.as_slice(), &index.to_be_bytes()].concat();

    // Inserted out of order, across two batches
    put(
        backend,
        Table::Receipts,
        vec![(key(256), b"r256".to_vec()), (key(0), b"r0".to_vec())],
    );
    put(backend, Table::Receipts, vec![(key(1), b"r1".to_vec())]);

    let view = backend.begin_read().unwrap();
    let values: Vec<_> = view
        .prefix_iterator(Table::Receipts, &block)
        .unwrap()
        .map(|entry| entry.unwrap().1.to_vec())
        .collect();
    assert_eq!(values, vec![b"r0".to_vec(), b"r1".to_vec(), b"r256".to_vec()]);
}
