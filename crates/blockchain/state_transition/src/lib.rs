//! Execution of candidate branches against the world state.
//!
//! A [`BranchProcessor`] runs a contiguous run of blocks on top of a state root and either
//! commits the whole run or restores the state it started from.

use ethtree_storage::StoreError;
use ethtree_types::primitives::{Address, H256, U256};
use serde::{Deserialize, Serialize};

pub mod executor;
pub mod metrics;
mod processor;
pub mod rewards;
pub mod tracers;
pub mod tx_pool;
pub mod validator;
pub mod world_state;

pub use processor::{BlockProcessedEvent, BranchProcessor, TransactionProcessedEvent};
pub use world_state::WorldState;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("unknown state root {0}")]
    UnknownStateRoot(H256),
    #[error("account {address} has balance {balance}, needs {required}")]
    InsufficientBalance {
        address: Address,
        balance: U256,
        required: U256,
    },
    #[error("state holds too many accounts to snapshot")]
    SnapshotTooLarge,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("invalid nonce for {sender}: expected {expected}, found {actual}")]
    InvalidNonce {
        sender: Address,
        expected: u64,
        actual: u64,
    },
    #[error("intrinsic gas {intrinsic} exceeds gas limit {gas_limit}")]
    IntrinsicGasTooLow { intrinsic: u64, gas_limit: u64 },
    #[error("block gas limit exceeded: {used} used + {requested} requested > {limit}")]
    BlockGasLimitExceeded { used: u64, requested: u64, limit: u64 },
    #[error(transparent)]
    State(#[from] StateError),
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("invalid block {hash}")]
    InvalidBlock { hash: H256 },
    #[error("transaction {index} of block {hash} can't be executed: {source}")]
    InvalidTransaction {
        hash: H256,
        index: usize,
        #[source]
        source: ExecutionError,
    },
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProcessingError {
    /// The block that broke consensus rules, if that's what failed.
    ///
    /// Storage and state failures return `None`: they say nothing about the block.
    pub fn invalid_block(&self) -> Option<H256> {
        match self {
            Self::InvalidBlock { hash } => Some(*hash),
            Self::InvalidTransaction {
                source: ExecutionError::State(_),
                ..
            } => None,
            Self::InvalidTransaction { hash, .. } => Some(*hash),
            Self::State(_) | Self::Store(_) => None,
        }
    }
}

/// Independent switches for a branch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingOptions {
    /// Take each sender nonce from state instead of from the transaction.
    pub do_not_verify_nonce: bool,
    /// Skip comparing executed blocks with suggested ones.
    pub no_validation: bool,
    /// Restore the starting state when the run ends, even on success.
    pub read_only_chain: bool,
    /// Persist receipts with the run.
    pub store_receipts: bool,
}

impl ProcessingOptions {
    pub const NONE: Self = Self {
        do_not_verify_nonce: false,
        no_validation: false,
        read_only_chain: false,
        store_receipts: false,
    };

    /// Executes for inspection only.
    pub const TRACE: Self = Self {
        do_not_verify_nonce: true,
        no_validation: true,
        read_only_chain: true,
        store_receipts: false,
    };

    /// Executes a locally assembled block, whose roots are not known in advance.
    pub const PRODUCING_BLOCK: Self = Self {
        do_not_verify_nonce: false,
        no_validation: true,
        read_only_chain: true,
        store_receipts: false,
    };

    pub fn with_receipts(mut self) -> Self {
        self.store_receipts = true;
        self
    }
}

/// A one-time balance move mandated at a given height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrregularStateChange {
    pub block_number: u64,
    /// Account receiving the drained balances.
    pub withdraw_account: Address,
    pub drained_accounts: Vec<Address>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default)]
    pub irregular_state_change: Option<IrregularStateChange>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processor_config_reads_irregular_state_change() {
        let config: ProcessorConfig = serde_json::from_str(
            r#"{
                "irregular_state_change": {
                    "block_number": 1920000,
                    "withdraw_account": "0xbf4ed7b27f1d666546e30d74d50d173d20bca754",
                    "drained_accounts": ["0x005f5cee7a43331d5a3d3eec71305925a62f34b6"]
                }
            }"#,
        )
        .unwrap();
        let change = config.irregular_state_change.unwrap();
        assert_eq!(change.block_number, 1_920_000);
        assert_eq!(change.drained_accounts.len(), 1);

        let empty: ProcessorConfig = serde_json::from_str("{}").unwrap();
        assert!(empty.irregular_state_change.is_none());
    }
}
