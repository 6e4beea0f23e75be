//! Startup: reloading pointers from storage and repairing what a crash left behind.

use ethtree_storage::StoreError;
use ethtree_types::{ShortRoot, primitives::H256};
use tracing::{error, info, warn};

use super::{BlockTree, LookupOptions};
use crate::BlockTreeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchDirection {
    /// Find the highest match, for predicates true below some height.
    Up,
    /// Find the lowest match, for predicates true above some height.
    Down,
}

/// Binary search over the inclusive range `[left, right]` for the boundary of a monotonic
/// predicate.
pub(crate) fn binary_search<F>(
    mut left: u64,
    mut right: u64,
    direction: SearchDirection,
    mut predicate: F,
) -> Result<Option<u64>, StoreError>
where
    F: FnMut(u64) -> Result<bool, StoreError>,
{
    if left > right {
        return Ok(None);
    }
    let mut result = None;
    while left != right {
        match direction {
            SearchDirection::Up => {
                let index = left + (right - left) / 2;
                if predicate(index)? {
                    result = Some(index);
                    left = index + 1;
                } else {
                    right = index;
                }
            }
            SearchDirection::Down => {
                let index = right - (right - left) / 2;
                if predicate(index)? {
                    result = Some(index);
                    right = index - 1;
                } else {
                    left = index;
                }
            }
        }
    }
    if predicate(left)? {
        result = Some(left);
    }
    Ok(result)
}

impl BlockTree {
    pub(super) fn load_chain(&self) -> Result<(), BlockTreeError> {
        let Some(mut genesis_level) = self.store.level(0)? else {
            info!("Block tree is empty");
            return Ok(());
        };
        if genesis_level.block_infos.len() > 1 {
            warn!(entries = genesis_level.block_infos.len(), "Multiple genesis blocks found, keeping the first");
            genesis_level.block_infos.truncate(1);
            let mut batch = self.store.write()?;
            batch.put_level(0, &genesis_level)?;
            batch.commit()?;
        }
        let Some(genesis_info) = genesis_level.block_infos.first() else {
            warn!("Genesis level has no blocks");
            return Ok(());
        };

        if genesis_info.was_processed {
            let genesis = self
                .find_header(&genesis_info.block_hash, LookupOptions::NONE)?
                .ok_or(BlockTreeError::UnknownBlock(genesis_info.block_hash))?;
            self.pointers.write().genesis = Some(genesis);
            if let Some(head_hash) = self.store.head_hash()? {
                self.load_head_block(&head_hash)?;
            }
        }

        self.load_lowest_inserted_body_number()?;
        self.load_lowest_inserted_header()?;
        let needs_fix = self.load_best_known()?;
        if needs_fix {
            self.attempt_to_fix_corruption()?;
        }
        Ok(())
    }

    /// Points the head at a stored block, taking its weight from its level.
    fn load_head_block(&self, hash: &H256) -> Result<(), BlockTreeError> {
        let mut block = self
            .find_block(hash, LookupOptions::TOTAL_DIFFICULTY_NOT_NEEDED)?
            .ok_or(BlockTreeError::HeadBlockMissing(*hash))?;
        let (info, _) = self
            .load_info(block.number(), hash)?
            .ok_or(BlockTreeError::HeadBlockMissing(*hash))?;
        block.header.total_difficulty = Some(info.total_difficulty);
        info!(number = block.number(), hash = %ShortRoot(&hash.0), "Loaded head block");
        self.pointers.write().head = Some(block);
        Ok(())
    }

    fn load_lowest_inserted_body_number(&self) -> Result<(), BlockTreeError> {
        let lowest = self.store.lowest_inserted_body_number()?;
        self.pointers.write().lowest_inserted_body_number = lowest;
        Ok(())
    }

    fn load_lowest_inserted_header(&self) -> Result<(), BlockTreeError> {
        let lowest = binary_search(1, self.config.pivot_number, SearchDirection::Down, |n| {
            self.store.has_level(n)
        })?;
        let Some(number) = lowest else {
            return Ok(());
        };
        let first = self
            .store
            .level(number)?
            .and_then(|level| level.block_infos.first().map(|info| info.block_hash));
        if let Some(hash) = first {
            let header = self.find_header(&hash, LookupOptions::TOTAL_DIFFICULTY_NOT_NEEDED)?;
            self.pointers.write().lowest_inserted_header = header;
        }
        Ok(())
    }

    /// Finds the highest level, header and body, and sets best known and best suggested
    /// from them.
    ///
    /// Returns whether the best body was above the best header, which an unclean shutdown
    /// can cause.
    fn load_best_known(&self) -> Result<bool, BlockTreeError> {
        let (head_number, lowest_header_number) = {
            let pointers = self.pointers.read();
            (
                pointers.head.as_ref().map_or(0, |head| head.number()),
                pointers.lowest_inserted_header.as_ref().map_or(0, |h| h.number),
            )
        };
        let left = if head_number == 0 {
            self.config
                .pivot_number
                .max(lowest_header_number)
                .saturating_sub(1)
        } else {
            head_number
        };
        let right = left.saturating_add(self.config.best_known_search_limit);

        let highest = |predicate: &dyn Fn(u64) -> Result<bool, StoreError>| -> Result<u64, StoreError> {
            let below = binary_search(1, left, SearchDirection::Up, predicate)?;
            let above = binary_search(left, right, SearchDirection::Up, predicate)?;
            Ok(below.max(above).unwrap_or(0))
        };
        let best_known = highest(&|n| self.store.has_level(n))?;
        let best_header = highest(&|n| self.any_block_at(n, |hash| self.store.has_header(hash)))?;
        let mut best_body = highest(&|n| self.any_block_at(n, |hash| self.store.has_block(hash)))?;
        info!(best_known, best_header, best_body, "Numbers resolved");
        if best_known == right {
            warn!(right, "Best known level is at the search ceiling, higher levels are ignored");
        }

        let mut needs_fix = false;
        if best_header < best_body {
            warn!(
                best_header,
                best_body,
                "Best body is above best header, likely after an unclean shutdown. Lowering best body"
            );
            best_body = best_header;
            needs_fix = true;
        }
        if best_header > best_known || best_body > best_known {
            return Err(BlockTreeError::CorruptedTree {
                best_known,
                best_header,
                best_body,
            });
        }

        self.pointers.write().best_known_number = best_known;
        let best_suggested_header = self.find_header_by_number(best_header, LookupOptions::NONE)?;
        let best_suggested_body = match self.find_header_by_number(best_body, LookupOptions::NONE)? {
            Some(header) => self.find_block(&header.hash(), LookupOptions::NONE)?,
            None => None,
        };
        let mut pointers = self.pointers.write();
        pointers.best_suggested_header = best_suggested_header;
        pointers.best_suggested_body = best_suggested_body;
        Ok(needs_fix)
    }

    fn any_block_at(
        &self,
        number: u64,
        exists: impl Fn(&H256) -> Result<bool, StoreError>,
    ) -> Result<bool, StoreError> {
        let Some(level) = self.store.level(number)? else {
            return Ok(false);
        };
        for info in &level.block_infos {
            if exists(&info.block_hash)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Moves the head to the canonical block at the best suggested height.
    fn attempt_to_fix_corruption(&self) -> Result<(), BlockTreeError> {
        let Some(number) = self.best_suggested_header().map(|h| h.number) else {
            return Ok(());
        };
        let canonical = self
            .store
            .level(number)?
            .and_then(|level| level.main_chain_block().map(|info| info.block_hash));
        match canonical {
            Some(hash) => {
                self.load_head_block(&hash)?;
                let mut batch = self.store.write()?;
                batch.set_head(&hash)?;
                batch.commit()?;
                info!(number, hash = %ShortRoot(&hash.0), "Recovered head after unclean shutdown");
            }
            None => {
                error!("Failed attempt to fix 'header < body' corruption caused by an unexpected shutdown");
            }
        }
        Ok(())
    }
}
