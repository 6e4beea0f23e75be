use std::collections::HashMap;

use ethtree_types::{block::Transaction, primitives::H256};
use parking_lot::Mutex;

/// The pending-transaction pool, as seen by the block processor.
pub trait TxPool: Send + Sync {
    /// Called for every transaction of a committed block.
    fn remove_transaction(&self, hash: &H256, block_number: u64);
}

/// A minimal pool keyed by transaction hash.
#[derive(Default)]
pub struct InMemoryTxPool {
    transactions: Mutex<HashMap<H256, Transaction>>,
}

impl InMemoryTxPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transaction(&self, tx: Transaction) {
        self.transactions.lock().insert(tx.hash(), tx);
    }

    pub fn contains(&self, hash: &H256) -> bool {
        self.transactions.lock().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.transactions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TxPool for InMemoryTxPool {
    fn remove_transaction(&self, hash: &H256, _block_number: u64) {
        self.transactions.lock().remove(hash);
    }
}
