use ssz_derive::{Decode, Encode};
use ssz_types::typenum::U1048576;
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

use crate::primitives::{H256, VariableList};

/// Outcome of executing a single transaction.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, TreeHash)]
pub struct Receipt {
    /// Hash of the executed transaction.
    pub tx_hash: H256,
    /// Height of the block the transaction was executed in.
    pub block_number: u64,
    /// Position of the transaction in its block.
    pub index: u32,
    /// Whether execution succeeded.
    pub success: bool,
    /// Gas spent by this transaction alone.
    pub gas_used: u64,
    /// Gas spent by this and every earlier transaction of the block.
    pub cumulative_gas_used: u64,
}

pub type Receipts = VariableList<Receipt, U1048576>;

/// Computes the receipts root committed to in the block header.
pub fn receipts_root(receipts: &[Receipt]) -> H256 {
    // The list is bounded by the same limit as block transactions, so this cannot truncate.
    Receipts::new(receipts.to_vec())
        .map(|list| list.tree_hash_root())
        .unwrap_or_default()
}
