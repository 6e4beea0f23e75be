mod block_tree;
mod chain;
mod config;
mod error;
pub mod events;
pub mod metrics;

pub use block_tree::{AcceptanceSuspension, AddBlockResult, BlockTree, LookupOptions};
pub use chain::BlockchainProcessor;
pub use config::BlockTreeConfig;
pub use error::{BlockTreeError, ChainError};
