#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ethtree_blockchain::{AddBlockResult, BlockTree, BlockTreeConfig};
use ethtree_storage::{ChainStore, StorageBackend, backend::InMemoryBackend};
use ethtree_types::{
    block::{Block, BlockBody, BlockHeader, ExtraData},
    primitives::U256,
};

pub fn open_tree(backend: &InMemoryBackend) -> BlockTree {
    open_tree_with(Arc::new(backend.clone()), BlockTreeConfig::default())
}

pub fn open_tree_with(backend: Arc<dyn StorageBackend>, config: BlockTreeConfig) -> BlockTree {
    let store = Arc::new(ChainStore::new(backend, 16));
    BlockTree::open(store, config).unwrap()
}

pub fn genesis() -> Block {
    Block::new(
        BlockHeader {
            difficulty: U256::from(1),
            ..Default::default()
        },
        BlockBody::default(),
    )
}

/// A child of `parent`. `salt` tells siblings of equal difficulty apart.
pub fn child(parent: &Block, difficulty: u64, salt: u8) -> Block {
    Block::new(
        BlockHeader {
            parent_hash: parent.hash(),
            number: parent.number() + 1,
            difficulty: U256::from(difficulty),
            timestamp: parent.header.timestamp + 12,
            extra_data: ExtraData::new(vec![salt]).unwrap(),
            ..Default::default()
        },
        BlockBody::default(),
    )
}

/// `length` blocks of difficulty 1 on top of `parent`.
pub fn chain_on(parent: &Block, length: usize, salt: u8) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::with_capacity(length);
    for _ in 0..length {
        let next = child(blocks.last().unwrap_or(parent), 1, salt);
        blocks.push(next);
    }
    blocks
}

/// Suggests `block` and makes it the processed head.
pub fn add_processed(tree: &BlockTree, block: &Block) {
    assert_eq!(tree.suggest_block(block, true).unwrap(), AddBlockResult::Added);
    tree.update_main_chain(std::slice::from_ref(block), true).unwrap();
}

/// A tree whose head is a processed genesis.
pub fn tree_with_genesis() -> (InMemoryBackend, BlockTree, Block) {
    let backend = InMemoryBackend::new();
    let tree = open_tree(&backend);
    let genesis = genesis();
    add_processed(&tree, &genesis);
    (backend, tree, genesis)
}

#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
