use std::sync::Arc;

use ethtree_state_transition::{BranchProcessor, ProcessingOptions, tracers::BlockTracer};
use ethtree_types::{ShortRoot, block::Block, genesis::Genesis};
use tracing::{debug, info, warn};

use crate::{AddBlockResult, BlockTree, ChainError, LookupOptions};

/// Connects the block tree to the branch processor.
///
/// Branches are taken from the tree, executed all-or-nothing, and their results made
/// canonical. Blocks the processor rejects are deleted from the tree with their
/// descendants.
pub struct BlockchainProcessor {
    tree: Arc<BlockTree>,
    processor: Arc<BranchProcessor>,
    options: ProcessingOptions,
}

impl BlockchainProcessor {
    pub fn new(tree: Arc<BlockTree>, processor: Arc<BranchProcessor>, options: ProcessingOptions) -> Self {
        Self {
            tree,
            processor,
            options,
        }
    }

    pub fn tree(&self) -> &Arc<BlockTree> {
        &self.tree
    }

    pub fn processor(&self) -> &Arc<BranchProcessor> {
        &self.processor
    }

    /// Writes the genesis state and makes the genesis block the head.
    ///
    /// Does nothing when the tree already has a genesis.
    pub fn initialize_genesis(&self, genesis: &Genesis) -> Result<Block, ChainError> {
        let block = genesis.block();
        if let Some(existing) = self.tree.genesis() {
            if existing.hash() != block.hash() {
                warn!(
                    stored = %ShortRoot(&existing.hash().0),
                    configured = %ShortRoot(&block.hash().0),
                    "Configured genesis differs from the stored one, keeping the stored genesis"
                );
            }
            return self
                .tree
                .find_block(&existing.hash(), LookupOptions::NONE)?
                .ok_or(ChainError::UnknownBlock(existing.hash()));
        }

        let state_root = self.processor.with_state(|state| {
            for (address, account) in &genesis.alloc {
                state.set_account(*address, account.clone());
            }
            let root = state.commit_tree()?;
            state.commit_to_storage()?;
            Ok::<_, ChainError>(root)
        })?;
        if state_root != block.header.state_root {
            return Err(ChainError::InvalidGenesis {
                expected: block.header.state_root,
                actual: state_root,
            });
        }

        self.tree.suggest_block(&block, true)?;
        let block = self
            .tree
            .find_block(&block.hash(), LookupOptions::NONE)?
            .ok_or(ChainError::UnknownBlock(block.hash()))?;
        self.tree.update_main_chain(std::slice::from_ref(&block), true)?;
        info!(hash = %ShortRoot(&block.hash().0), accounts = genesis.alloc.len(), "Initialized genesis");
        Ok(block)
    }

    /// Suggests `block` and processes the best suggested body if it changed.
    pub fn add_block(&self, block: &Block, tracer: &mut dyn BlockTracer) -> Result<AddBlockResult, ChainError> {
        let result = self.tree.suggest_block(block, true)?;
        if result == AddBlockResult::Added {
            self.process_best_suggested(tracer)?;
        }
        Ok(result)
    }

    /// Processes the branch ending at the best suggested body, unless it is already the head.
    pub fn process_best_suggested(&self, tracer: &mut dyn BlockTracer) -> Result<Vec<Block>, ChainError> {
        let Some(best) = self.tree.best_suggested_body() else {
            return Ok(Vec::new());
        };
        if self.tree.head_hash() == Some(best.hash()) {
            return Ok(Vec::new());
        }
        self.process_branch(&best, tracer)
    }

    /// Executes every unprocessed block from the last processed canonical ancestor up to
    /// `block`, then makes the branch canonical.
    pub fn process_branch(&self, block: &Block, tracer: &mut dyn BlockTracer) -> Result<Vec<Block>, ChainError> {
        let (branch, branching_point) = self.collect_branch(block)?;
        if branch.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            from = branch[0].number(),
            to = block.number(),
            base = %ShortRoot(&branching_point.hash().0),
            "Processing branch"
        );

        match self
            .processor
            .process(branching_point.header.state_root, &branch, self.options, tracer)
        {
            Ok(processed) => {
                if !self.options.read_only_chain {
                    self.tree.update_main_chain(&processed, true)?;
                }
                Ok(processed)
            }
            Err(err) => {
                if let Some(invalid) = err.invalid_block() {
                    match branch.iter().find(|b| b.hash() == invalid) {
                        Some(invalid_block) => self.tree.delete_invalid_block(invalid_block)?,
                        None => warn!(hash = %ShortRoot(&invalid.0), "Invalid block is not part of the branch"),
                    }
                }
                Err(err.into())
            }
        }
    }

    /// The blocks between the last processed canonical ancestor of `block` (exclusive)
    /// and `block` (inclusive), in ascending order, together with that ancestor.
    fn collect_branch(&self, block: &Block) -> Result<(Vec<Block>, Block), ChainError> {
        let mut branch = Vec::new();
        let mut current = block.clone();
        loop {
            if self.is_processed_canonical(&current)? {
                branch.reverse();
                return Ok((branch, current));
            }
            let parent_hash = current.parent_hash();
            if current.is_genesis() {
                return Err(ChainError::UnknownBlock(parent_hash));
            }
            let parent = self
                .tree
                .find_block(&parent_hash, LookupOptions::NONE)?
                .ok_or(ChainError::UnknownBlock(parent_hash))?;
            branch.push(current);
            current = parent;
        }
    }

    fn is_processed_canonical(&self, block: &Block) -> Result<bool, ChainError> {
        Ok(self.tree.is_main_chain(&block.header)?
            && self.tree.was_processed(block.number(), &block.hash())?)
    }
}
