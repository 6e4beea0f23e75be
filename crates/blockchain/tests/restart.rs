mod common;

use std::sync::Arc;

use common::{add_processed, chain_on, child, open_tree, open_tree_with, tree_with_genesis};
use ethtree_blockchain::{BlockTreeConfig, LookupOptions};
use ethtree_storage::backend::{InMemoryBackend, RocksDBBackend};
use ethtree_types::{
    chain_level::{BlockInfo, ChainLevelInfo},
    primitives::{H256, U256},
};

#[test]
fn reopening_restores_pointers() {
    let (backend, tree, genesis) = tree_with_genesis();
    let blocks = chain_on(&genesis, 3, 1);
    for block in &blocks {
        add_processed(&tree, block);
    }
    let side = child(&blocks[0], 1, 9);
    tree.suggest_block(&side, true).unwrap();
    drop(tree);

    let tree = open_tree(&backend);
    assert_eq!(tree.genesis().unwrap().hash(), genesis.hash());
    let head = tree.head().unwrap();
    assert_eq!(head.hash(), blocks[2].hash());
    assert_eq!(head.total_difficulty(), Some(U256::from(4)));
    assert_eq!(tree.best_known_number(), 3);
    assert_eq!(tree.best_suggested_header().unwrap().hash(), blocks[2].hash());
    assert_eq!(tree.best_suggested_body().unwrap().hash(), blocks[2].hash());
    assert!(tree.is_known_block(2, &side.hash()).unwrap());
}

#[test]
fn empty_store_opens_without_genesis() {
    let tree = open_tree(&InMemoryBackend::new());
    assert!(tree.genesis().is_none());
    assert!(tree.head().is_none());
    assert_eq!(tree.best_known_number(), 0);
}

#[test]
fn interrupted_deletion_resumes_on_open() {
    let (backend, tree, genesis) = tree_with_genesis();
    let a = chain_on(&genesis, 3, 1);
    add_processed(&tree, &a[0]);
    tree.suggest_block(&a[1], true).unwrap();
    tree.suggest_block(&a[2], true).unwrap();
    let sibling = child(&a[0], 1, 7);
    tree.suggest_block(&sibling, true).unwrap();

    // Crash right after the delete pointer was persisted.
    let mut batch = tree.store().write().unwrap();
    batch.set_delete_pointer(Some(&a[1].hash())).unwrap();
    batch.commit().unwrap();
    drop(tree);

    let tree = open_tree(&backend);
    assert_eq!(tree.store().delete_pointer().unwrap(), None);
    assert!(tree.find_block(&a[1].hash(), LookupOptions::NONE).unwrap().is_none());
    assert!(tree.find_block(&a[2].hash(), LookupOptions::NONE).unwrap().is_none());
    assert!(tree.find_block(&sibling.hash(), LookupOptions::NONE).unwrap().is_some());
    assert_eq!(tree.find_level(3).unwrap(), None);
    assert_eq!(tree.best_known_number(), 2);
    assert_eq!(tree.head_hash(), Some(a[0].hash()));
}

#[test]
fn stale_delete_pointer_is_cleared() {
    let (backend, tree, _) = tree_with_genesis();
    let mut batch = tree.store().write().unwrap();
    batch.set_delete_pointer(Some(&H256::repeat_byte(0x5a))).unwrap();
    batch.commit().unwrap();
    drop(tree);

    let tree = open_tree(&backend);
    assert_eq!(tree.store().delete_pointer().unwrap(), None);
    assert!(tree.head().is_some());
}

#[test]
fn body_above_header_moves_head_to_best_header() {
    let (backend, tree, genesis) = tree_with_genesis();
    let blocks = chain_on(&genesis, 3, 1);
    for block in &blocks {
        add_processed(&tree, block);
    }

    // Unclean shutdown: the head key lags and a body was written without its header.
    let orphan_body = child(&blocks[2], 1, 1);
    let mut batch = tree.store().write().unwrap();
    batch.set_head(&blocks[0].hash()).unwrap();
    batch.put_block(&orphan_body).unwrap();
    batch
        .put_level(
            4,
            &ChainLevelInfo::new(false, vec![BlockInfo::new(orphan_body.hash(), U256::from(5))]),
        )
        .unwrap();
    batch.commit().unwrap();
    drop(tree);

    let tree = open_tree(&backend);
    assert_eq!(tree.head_hash(), Some(blocks[2].hash()));
    assert_eq!(tree.store().head_hash().unwrap(), Some(blocks[2].hash()));
    assert_eq!(tree.best_known_number(), 4);
    assert_eq!(tree.best_suggested_header().unwrap().hash(), blocks[2].hash());
    assert_eq!(tree.best_suggested_body().unwrap().hash(), blocks[2].hash());
}

#[test]
fn extra_genesis_entries_are_dropped() {
    let (backend, tree, genesis) = tree_with_genesis();
    let mut level = tree.find_level(0).unwrap().unwrap();
    level
        .block_infos
        .push(BlockInfo::new(H256::repeat_byte(0x99), U256::from(1)));
    let mut batch = tree.store().write().unwrap();
    batch.put_level(0, &level).unwrap();
    batch.commit().unwrap();
    drop(tree);

    let tree = open_tree(&backend);
    let level = tree.find_level(0).unwrap().unwrap();
    assert_eq!(level.block_infos.len(), 1);
    assert_eq!(level.block_infos[0].block_hash, genesis.hash());
}

#[test]
fn lowest_inserted_header_is_found_below_pivot() {
    let (backend, tree, genesis) = tree_with_genesis();
    let blocks = chain_on(&genesis, 10, 1);
    let mut batch = tree.store().write().unwrap();
    for block in &blocks[5..] {
        let total_difficulty = U256::from(block.number() + 1);
        batch.put_header(&block.header).unwrap();
        batch
            .put_level(
                block.number(),
                &ChainLevelInfo::new(true, vec![BlockInfo::new(block.hash(), total_difficulty)]),
            )
            .unwrap();
    }
    batch.commit().unwrap();
    drop(tree);

    let tree = open_tree_with(
        Arc::new(backend),
        BlockTreeConfig {
            pivot_number: 10,
            ..Default::default()
        },
    );
    assert_eq!(tree.lowest_inserted_header().unwrap().number, 6);
    assert_eq!(tree.best_known_number(), 10);
    assert_eq!(tree.best_suggested_header().unwrap().hash(), blocks[9].hash());
    assert_eq!(tree.best_suggested_body().unwrap().hash(), genesis.hash());
}

#[test]
fn rocksdb_tree_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let genesis = common::genesis();
    let blocks = chain_on(&genesis, 4, 1);
    {
        let backend = Arc::new(RocksDBBackend::open(dir.path()).unwrap());
        let tree = open_tree_with(backend, BlockTreeConfig::default());
        add_processed(&tree, &genesis);
        for block in &blocks[..3] {
            add_processed(&tree, block);
        }
        tree.suggest_block(&blocks[3], true).unwrap();
        tree.delete_invalid_block(&blocks[3]).unwrap();
    }

    let backend = Arc::new(RocksDBBackend::open(dir.path()).unwrap());
    let tree = open_tree_with(backend, BlockTreeConfig::default());
    assert_eq!(tree.genesis().unwrap().hash(), genesis.hash());
    assert_eq!(tree.head_hash(), Some(blocks[2].hash()));
    assert_eq!(tree.best_known_number(), 3);
    assert!(tree.find_block(&blocks[3].hash(), LookupOptions::NONE).unwrap().is_none());
    assert!(tree.is_main_chain(&blocks[2].header).unwrap());
}
