//! Notifications emitted by the block tree.

use ethtree_types::{block::Block, listeners::Listeners};

/// A block became the best suggested one and should be processed.
#[derive(Debug, Clone)]
pub struct NewBestSuggestedBlock {
    pub block: Block,
}

/// The head moved. Emitted after the head pointer is durable.
#[derive(Debug, Clone)]
pub struct NewHeadBlock {
    pub block: Block,
}

/// A block became canonical at its height.
#[derive(Debug, Clone)]
pub struct BlockAddedToMain {
    pub block: Block,
    /// The canonical block it replaced, if there was a different one.
    pub previous: Option<Block>,
}

#[derive(Default)]
pub(crate) struct TreeEvents {
    pub new_best_suggested: Listeners<NewBestSuggestedBlock>,
    pub new_head: Listeners<NewHeadBlock>,
    pub block_added_to_main: Listeners<BlockAddedToMain>,
}
