use ethtree_fork_choice::ForkChoiceError;
use ethtree_state_transition::{ProcessingError, StateError};
use ethtree_storage::StoreError;
use ethtree_types::primitives::H256;

#[derive(Debug, thiserror::Error)]
pub enum BlockTreeError {
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
    #[error("block tree must be initialized with genesis before suggesting other blocks")]
    GenesisNotSet,
    #[error("invalid chain slice [{start}, {end}]: {reason}")]
    InvalidSliceRange {
        start: u64,
        end: u64,
        reason: &'static str,
    },
    #[error(
        "invalid initial block tree state: best known {best_known}, best header {best_header}, best body {best_body}"
    )]
    CorruptedTree {
        best_known: u64,
        best_header: u64,
        best_body: u64,
    },
    #[error("unknown block {0}")]
    UnknownBlock(H256),
    #[error("head block {0} is missing from storage")]
    HeadBlockMissing(H256),
    #[error(transparent)]
    ForkChoice(#[from] ForkChoiceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("genesis state root mismatch: header has {expected}, allocations give {actual}")]
    InvalidGenesis { expected: H256, actual: H256 },
    #[error("block {0} is not part of the tree")]
    UnknownBlock(H256),
    #[error(transparent)]
    Tree(#[from] BlockTreeError),
    #[error(transparent)]
    Processing(#[from] ProcessingError),
    #[error(transparent)]
    State(#[from] StateError),
}
