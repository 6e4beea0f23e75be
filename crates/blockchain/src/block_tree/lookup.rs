use ethtree_fork_choice::best_block_info;
use ethtree_types::{
    ShortRoot,
    block::{Block, BlockHeader},
    chain_level::{BlockInfo, ChainLevelInfo},
    primitives::H256,
};
use tracing::trace;

use super::BlockTree;
use crate::BlockTreeError;

/// What a lookup must guarantee about the returned block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupOptions {
    /// Skip resolving the accumulated weight when it is unknown.
    pub total_difficulty_not_needed: bool,
    /// Only return blocks that are canonical at their height.
    pub require_canonical: bool,
}

impl LookupOptions {
    pub const NONE: Self = Self {
        total_difficulty_not_needed: false,
        require_canonical: false,
    };
    pub const TOTAL_DIFFICULTY_NOT_NEEDED: Self = Self {
        total_difficulty_not_needed: true,
        require_canonical: false,
    };
    pub const REQUIRE_CANONICAL: Self = Self {
        total_difficulty_not_needed: false,
        require_canonical: true,
    };
}

impl BlockTree {
    /// Heights that go through the header and block caches: genesis, and a window ending
    /// just above the head.
    pub(super) fn should_cache(&self, number: u64) -> bool {
        let Some(head_number) = self.pointers.read().head.as_ref().map(Block::number) else {
            return true;
        };
        let cache_size = self.config.cache_size as u64;
        number == 0
            || (number > head_number.saturating_sub(cache_size) && number <= head_number + 1)
    }

    /// Resolves weight and canonicality of a header or block per `options`.
    ///
    /// A block missing from its level (which happens to blocks stored before their level
    /// was written) gets its weight computed and the level backfilled.
    fn resolve(
        &self,
        header: &mut BlockHeader,
        options: LookupOptions,
    ) -> Result<bool, BlockTreeError> {
        let needs_difficulty =
            !options.total_difficulty_not_needed && header.total_difficulty.is_none();
        if !needs_difficulty && !options.require_canonical {
            return Ok(true);
        }

        let _guard = self.level_lock.lock();
        let hash = header.hash();
        let level = match self.load_info(header.number, &hash)? {
            Some((info, level)) => {
                header.total_difficulty = Some(info.total_difficulty);
                level
            }
            None => {
                trace!(number = header.number, hash = %ShortRoot(&hash.0), "Backfilling missing block info");
                header.total_difficulty = None;
                let total_difficulty = self.total_difficulty(header)?;
                header.total_difficulty = Some(total_difficulty);
                self.update_or_create_level(
                    header.number,
                    BlockInfo::new(hash, total_difficulty),
                    false,
                )?
            }
        };

        if options.require_canonical {
            return Ok(level.main_chain_block().map(|info| info.block_hash) == Some(hash));
        }
        Ok(true)
    }

    pub fn find_header(
        &self,
        hash: &H256,
        options: LookupOptions,
    ) -> Result<Option<BlockHeader>, BlockTreeError> {
        if hash.is_zero() {
            return Ok(None);
        }
        let Some(mut header) = self.store.header(hash)? else {
            return Ok(None);
        };
        if !self.resolve(&mut header, options)? {
            return Ok(None);
        }
        if self.should_cache(header.number) {
            self.store.cache_header(header.clone());
        }
        Ok(Some(header))
    }

    pub fn find_block(&self, hash: &H256, options: LookupOptions) -> Result<Option<Block>, BlockTreeError> {
        if hash.is_zero() {
            return Ok(None);
        }
        let Some(mut block) = self.store.block(hash)? else {
            return Ok(None);
        };
        if !self.resolve(&mut block.header, options)? {
            return Ok(None);
        }
        if self.should_cache(block.number()) {
            self.store.cache_header(block.header.clone());
            self.store.cache_block(block.clone());
        }
        Ok(Some(block))
    }

    pub fn find_parent_header(
        &self,
        header: &BlockHeader,
        options: LookupOptions,
    ) -> Result<Option<BlockHeader>, BlockTreeError> {
        self.find_header(&header.parent_hash, options)
    }

    pub fn find_parent(&self, block: &Block, options: LookupOptions) -> Result<Option<Block>, BlockTreeError> {
        self.find_block(&block.parent_hash(), options)
    }

    pub fn find_level(&self, number: u64) -> Result<Option<ChainLevelInfo>, BlockTreeError> {
        Ok(self.store.level(number)?)
    }

    /// The effective block hash at `number`: the canonical one if marked, otherwise the
    /// heaviest.
    pub fn find_block_hash(&self, number: u64) -> Result<Option<H256>, BlockTreeError> {
        Ok(self
            .load_level(number)?
            .and_then(|level| best_block_info(&level).map(|info| info.block_hash)))
    }

    pub fn find_header_by_number(
        &self,
        number: u64,
        options: LookupOptions,
    ) -> Result<Option<BlockHeader>, BlockTreeError> {
        match self.find_block_hash(number)? {
            Some(hash) => self.find_header(&hash, options),
            None => Ok(None),
        }
    }

    pub fn find_block_by_number(
        &self,
        number: u64,
        options: LookupOptions,
    ) -> Result<Option<Block>, BlockTreeError> {
        match self.find_block_hash(number)? {
            Some(hash) => self.find_block(&hash, options),
            None => Ok(None),
        }
    }

    /// The canonical block info at `number`, if the level has one.
    pub fn find_canonical_block_info(&self, number: u64) -> Result<Option<BlockInfo>, BlockTreeError> {
        Ok(self
            .load_level(number)?
            .and_then(|level| level.main_chain_block().cloned()))
    }

    /// Up to `count` headers starting at `hash`, `skip` heights apart, walking down when
    /// `reverse` is set.
    ///
    /// The result always has `count` slots; slots past the first missing header are
    /// `None`. With no skip, a contiguous run is assembled through parent links from the
    /// header found at the far end.
    pub fn find_headers(
        &self,
        hash: &H256,
        count: usize,
        skip: u64,
        reverse: bool,
    ) -> Result<Vec<Option<BlockHeader>>, BlockTreeError> {
        let mut result = vec![None; count];
        if count == 0 {
            return Ok(result);
        }
        let Some(start) = self.find_header(hash, LookupOptions::TOTAL_DIFFICULTY_NOT_NEEDED)? else {
            return Ok(result);
        };
        if count == 1 {
            result[0] = Some(start);
            return Ok(result);
        }

        let span = count as u64 - 1;
        if skip == 0 && !reverse {
            let end = self.find_header_by_number(
                start.number + span,
                LookupOptions::TOTAL_DIFFICULTY_NOT_NEEDED,
            )?;
            if let Some(end) = end {
                return self.fill_from_end(end, result);
            }
        }

        let mut current = Some(start.clone());
        for (i, slot) in result.iter_mut().enumerate() {
            let Some(header) = current.take() else {
                break;
            };
            *slot = Some(header);
            let step = (i as u64 + 1) * (skip + 1);
            let next = if reverse {
                start.number.checked_sub(step)
            } else {
                start.number.checked_add(step)
            };
            current = match next {
                Some(number) => {
                    self.find_header_by_number(number, LookupOptions::TOTAL_DIFFICULTY_NOT_NEEDED)?
                }
                None => None,
            };
        }
        Ok(result)
    }

    fn fill_from_end(
        &self,
        end: BlockHeader,
        mut result: Vec<Option<BlockHeader>>,
    ) -> Result<Vec<Option<BlockHeader>>, BlockTreeError> {
        let mut current = Some(end);
        for slot in result.iter_mut().rev() {
            let Some(header) = current.take() else {
                break;
            };
            current = self.find_parent_header(&header, LookupOptions::TOTAL_DIFFICULTY_NOT_NEEDED)?;
            *slot = Some(header);
        }
        Ok(result)
    }

    /// The deepest common ancestor of `first` and `second`, looking at most `max_depth`
    /// levels above the lower of the two.
    pub fn find_lowest_common_ancestor(
        &self,
        first: &BlockHeader,
        second: &BlockHeader,
        max_depth: u64,
    ) -> Result<Option<BlockHeader>, BlockTreeError> {
        let target = first.number.min(second.number);
        let (Some(mut first), Some(mut second)) = (
            self.ancestor_at(first.clone(), target)?,
            self.ancestor_at(second.clone(), target)?,
        ) else {
            return Ok(None);
        };

        let mut depth = 0;
        while first.hash() != second.hash() {
            if depth >= max_depth {
                return Ok(None);
            }
            let (Some(first_parent), Some(second_parent)) = (
                self.find_parent_header(&first, LookupOptions::TOTAL_DIFFICULTY_NOT_NEEDED)?,
                self.find_parent_header(&second, LookupOptions::TOTAL_DIFFICULTY_NOT_NEEDED)?,
            ) else {
                return Ok(None);
            };
            first = first_parent;
            second = second_parent;
            depth += 1;
        }
        Ok(Some(first))
    }

    /// Walks parent links from `header` down to height `number`.
    fn ancestor_at(&self, mut header: BlockHeader, number: u64) -> Result<Option<BlockHeader>, BlockTreeError> {
        while header.number > number {
            match self.find_parent_header(&header, LookupOptions::TOTAL_DIFFICULTY_NOT_NEEDED)? {
                Some(parent) => header = parent,
                None => return Ok(None),
            }
        }
        Ok(Some(header))
    }

    /// Whether `header` is the canonical block at its height.
    pub fn is_main_chain(&self, header: &BlockHeader) -> Result<bool, BlockTreeError> {
        let hash = header.hash();
        Ok(self
            .store
            .level(header.number)?
            .and_then(|level| level.main_chain_block().map(|info| info.block_hash))
            == Some(hash))
    }

    pub fn is_main_chain_hash(&self, hash: &H256) -> Result<bool, BlockTreeError> {
        let header = self
            .find_header(hash, LookupOptions::TOTAL_DIFFICULTY_NOT_NEEDED)?
            .ok_or(BlockTreeError::UnknownBlock(*hash))?;
        self.is_main_chain(&header)
    }

    /// Whether the block was processed. Fails for blocks missing from their level.
    pub fn was_processed(&self, number: u64, hash: &H256) -> Result<bool, BlockTreeError> {
        self.load_info(number, hash)?
            .map(|(info, _)| info.was_processed)
            .ok_or(BlockTreeError::UnknownBlock(*hash))
    }

    /// Whether the tree holds the block at `number`.
    pub fn is_known_block(&self, number: u64, hash: &H256) -> Result<bool, BlockTreeError> {
        if number > self.best_known_number() {
            return Ok(false);
        }
        if self.head_hash() == Some(*hash) {
            return Ok(true);
        }
        if self.store.cached_header(hash).is_some() {
            return Ok(true);
        }
        Ok(self
            .store
            .level(number)?
            .is_some_and(|level| level.contains(hash)))
    }
}
