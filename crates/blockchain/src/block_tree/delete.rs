use ethtree_types::{
    ShortRoot,
    block::{Block, BlockHeader},
    chain_level::ChainLevelInfo,
    primitives::H256,
};
use tracing::{debug, info, warn};

use super::{BlockTree, LookupOptions};
use crate::{BlockTreeError, events::NewHeadBlock, metrics};

impl BlockTree {
    /// Removes `block` and every descendant reachable through first children.
    ///
    /// The block is remembered as invalid, best suggested falls back to the head, and new
    /// blocks are rejected until the deletion completes.
    pub fn delete_invalid_block(&self, block: &Block) -> Result<(), BlockTreeError> {
        self.delete_invalid_header(&block.header)
    }

    pub fn delete_invalid_header(&self, header: &BlockHeader) -> Result<(), BlockTreeError> {
        let hash = header.hash();
        debug!(number = header.number, hash = %ShortRoot(&hash.0), "Deleting invalid block");
        self.mark_invalid(header.number, hash);

        let _suspension = self.suspend_new_blocks();
        {
            let mut pointers = self.pointers.write();
            pointers.best_suggested_header = pointers.head.as_ref().map(|head| head.header.clone());
            pointers.best_suggested_body = pointers.head.clone();
        }
        self.delete_blocks(&hash)?;
        self.update_metrics();
        Ok(())
    }

    /// Deletes the block at `pointer` and its first-child descendants.
    ///
    /// Each step atomically removes one block and records the next one as the delete
    /// pointer, so a crash leaves a pointer from which [`BlockTree::open`] resumes.
    pub(super) fn delete_blocks(&self, pointer: &H256) -> Result<(), BlockTreeError> {
        let _guard = self.level_lock.lock();

        let Some(start) = self.store.header(pointer)? else {
            warn!(hash = %ShortRoot(&pointer.0), "Delete pointer refers to an unknown block, clearing it");
            let mut batch = self.store.write()?;
            batch.set_delete_pointer(None)?;
            batch.commit()?;
            return Ok(());
        };

        let mut number = start.number;
        let mut hash = *pointer;
        let mut batch = self.store.write()?;
        batch.set_delete_pointer(Some(&hash))?;
        batch.commit()?;

        let mut current_level = self.store.level(number)?;
        loop {
            let next_level = self.store.level(number + 1)?;
            let next_hash = match &next_level {
                Some(level) => self.find_child(level, &hash)?,
                None => None,
            };

            let mut batch = self.store.write()?;
            batch.set_delete_pointer(next_hash.as_ref())?;
            if let Some(next) = &next_hash {
                info!(hash = %ShortRoot(&next.0), "Deleting an invalid block or its descendant");
            }

            let mut level_removed = false;
            if let Some(mut level) = current_level.take() {
                if level.block_infos.len() == 1 && level.contains(&hash) {
                    batch.delete_level(number)?;
                    level_removed = true;
                } else {
                    let was_canonical =
                        level.main_chain_block().map(|info| info.block_hash) == Some(hash);
                    level.remove(&hash);
                    if was_canonical {
                        level.has_block_on_main_chain = false;
                    }
                    batch.put_level(number, &level)?;
                }
            }
            batch.delete_block(&hash)?;
            batch.delete_header(&hash)?;
            batch.commit()?;

            if level_removed {
                self.lower_best_known(number.saturating_sub(1));
            }
            info!(hash = %ShortRoot(&hash.0), number, "Deleted invalid block");
            metrics::inc_invalid_blocks_deleted();

            match next_hash {
                Some(next) => {
                    hash = next;
                    number += 1;
                    current_level = next_level;
                }
                None => break,
            }
        }
        Ok(())
    }

    /// The first block in `level` whose parent is `parent`.
    fn find_child(&self, level: &ChainLevelInfo, parent: &H256) -> Result<Option<H256>, BlockTreeError> {
        for info in &level.block_infos {
            let Some(header) = self.store.header(&info.block_hash)? else {
                continue;
            };
            if header.parent_hash == *parent {
                return Ok(Some(info.block_hash));
            }
        }
        Ok(None)
    }

    /// Deletes every level from `start` to `end` (the best known level by default) with
    /// their blocks and headers, and returns how many levels were removed.
    ///
    /// When the head is inside the slice, it moves to the canonical block just below
    /// `start`, falling back to genesis.
    pub fn delete_chain_slice(&self, start: u64, end: Option<u64>) -> Result<usize, BlockTreeError> {
        let end = end.unwrap_or_else(|| self.best_known_number());
        let invalid = |reason| BlockTreeError::InvalidSliceRange { start, end, reason };
        if end < start {
            return Err(invalid("start must not exceed end"));
        }
        if end - start > self.config.max_delete_slice {
            return Err(invalid("slice is too large"));
        }
        if start < 1 {
            return Err(invalid("genesis cannot be deleted"));
        }

        let guard = self.level_lock.lock();
        let head_number = self.head().map(|head| head.number());
        let new_head = match head_number {
            Some(head_number) if head_number >= start => {
                let canonical = self
                    .store
                    .level(start - 1)?
                    .and_then(|level| level.main_chain_block().map(|info| info.block_hash));
                let hash = match canonical.or_else(|| self.genesis().map(|g| g.hash())) {
                    Some(hash) => hash,
                    None => return Err(BlockTreeError::GenesisNotSet),
                };
                let block = self
                    .find_block(&hash, LookupOptions::NONE)?
                    .ok_or(BlockTreeError::UnknownBlock(hash))?;
                Some(block)
            }
            _ => None,
        };

        let mut batch = self.store.write()?;
        let mut deleted = 0;
        for number in (start..=end).rev() {
            let Some(level) = self.store.level(number)? else {
                continue;
            };
            batch.delete_level(number)?;
            for info in &level.block_infos {
                batch.delete_header(&info.block_hash)?;
                batch.delete_block(&info.block_hash)?;
            }
            deleted += 1;
        }
        batch.commit()?;
        info!(start, end, deleted, "Deleted chain slice");

        if end >= self.best_known_number() {
            self.lower_best_known(start - 1);
        }
        {
            let mut pointers = self.pointers.write();
            if pointers
                .best_suggested_header
                .as_ref()
                .is_some_and(|best| best.number >= start)
            {
                let fallback = new_head.clone().or_else(|| pointers.head.clone());
                pointers.best_suggested_header = fallback.as_ref().map(|b| b.header.clone());
                pointers.best_suggested_body = fallback;
            }
        }
        match &new_head {
            Some(head) => self.set_head_block(head)?,
            None => self.update_metrics(),
        }
        drop(guard);

        if let Some(block) = new_head {
            self.events.new_head.emit(&NewHeadBlock { block });
        }
        Ok(deleted)
    }
}
