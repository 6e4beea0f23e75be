//! Every known block organized by height, with the canonical chain and fork-choice pointers.

mod delete;
mod lookup;
mod recovery;

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ethtree_fork_choice::{ForkChoiceError, WeightSource, compute_total_difficulty, is_heavier};
use ethtree_storage::{ChainStore, StoreError};
use ethtree_types::{
    ShortRoot,
    block::{Block, BlockHeader},
    chain_level::{BlockInfo, ChainLevelInfo},
    listeners::Subscription,
    primitives::{H256, U256},
};
use lru::LruCache;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, info, trace};

pub use lookup::LookupOptions;

use crate::{
    BlockTreeConfig, BlockTreeError,
    events::{BlockAddedToMain, NewBestSuggestedBlock, NewHeadBlock, TreeEvents},
    metrics,
};

/// Outcome of offering a block or header to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddBlockResult {
    Added,
    AlreadyKnown,
    /// New blocks are suspended while invalid blocks are being deleted.
    CannotAccept,
    /// The block was previously found invalid.
    InvalidBlock,
    UnknownParent,
}

#[derive(Debug, Clone, Default)]
struct ChainPointers {
    genesis: Option<BlockHeader>,
    head: Option<Block>,
    best_suggested_header: Option<BlockHeader>,
    best_suggested_body: Option<Block>,
    lowest_inserted_header: Option<BlockHeader>,
    lowest_inserted_body_number: Option<u64>,
    best_known_number: u64,
}

/// Keeps new blocks rejected while alive.
#[must_use]
pub struct AcceptanceSuspension<'a> {
    suspensions: &'a AtomicUsize,
}

impl Drop for AcceptanceSuspension<'_> {
    fn drop(&mut self) {
        self.suspensions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The block tree.
///
/// Blocks are stored by hash and grouped by height into chain levels. Each level lists
/// the blocks known at that height with their accumulated weight; when the level holds a
/// canonical block it is the first entry. The tree tracks genesis, the head (heaviest
/// processed block on the canonical chain), the best suggested block (heaviest known
/// block) and the highest known level.
///
/// Every read-modify-write of a chain level happens under one reentrant lock, so
/// levels never lose concurrent updates. Pointers are kept behind a separate lock that is
/// never held while calling back into the tree.
pub struct BlockTree {
    store: Arc<ChainStore>,
    config: BlockTreeConfig,
    pointers: RwLock<ChainPointers>,
    level_lock: ReentrantMutex<()>,
    batch_insert_lock: Mutex<()>,
    suspensions: AtomicUsize,
    /// Hashes found invalid, by height.
    invalid_blocks: Mutex<LruCache<u64, HashSet<H256>>>,
    events: TreeEvents,
}

impl BlockTree {
    /// Opens the tree over `store`.
    ///
    /// Finishes any deletion interrupted by a crash, then reloads genesis, the head and
    /// the best suggested block from storage.
    pub fn open(store: Arc<ChainStore>, config: BlockTreeConfig) -> Result<Self, BlockTreeError> {
        let invalid_capacity =
            NonZeroUsize::new(config.invalid_blocks_cache_levels).unwrap_or(NonZeroUsize::MIN);
        let tree = Self {
            store,
            config,
            pointers: RwLock::new(ChainPointers::default()),
            level_lock: ReentrantMutex::new(()),
            batch_insert_lock: Mutex::new(()),
            suspensions: AtomicUsize::new(0),
            invalid_blocks: Mutex::new(LruCache::new(invalid_capacity)),
            events: TreeEvents::default(),
        };

        if let Some(pointer) = tree.store.delete_pointer()? {
            info!(hash = %ShortRoot(&pointer.0), "Resuming interrupted deletion of invalid blocks");
            tree.delete_blocks(&pointer)?;
        }
        tree.load_chain()?;

        let pointers = tree.pointers.read().clone();
        info!(
            head = pointers.head.as_ref().map(Block::number),
            best_suggested = pointers.best_suggested_header.as_ref().map(|h| h.number),
            best_known = pointers.best_known_number,
            lowest_header = pointers.lowest_inserted_header.as_ref().map(|h| h.number),
            lowest_body = pointers.lowest_inserted_body_number,
            "Block tree initialized"
        );
        tree.update_metrics();
        Ok(tree)
    }

    pub fn store(&self) -> &Arc<ChainStore> {
        &self.store
    }

    pub fn config(&self) -> &BlockTreeConfig {
        &self.config
    }

    // ============ Pointers ============

    pub fn genesis(&self) -> Option<BlockHeader> {
        self.pointers.read().genesis.clone()
    }

    pub fn head(&self) -> Option<Block> {
        self.pointers.read().head.clone()
    }

    pub fn head_hash(&self) -> Option<H256> {
        self.pointers.read().head.as_ref().map(Block::hash)
    }

    pub fn best_suggested_header(&self) -> Option<BlockHeader> {
        self.pointers.read().best_suggested_header.clone()
    }

    /// The heaviest known block with a body that was suggested for processing.
    pub fn best_suggested_body(&self) -> Option<Block> {
        self.pointers.read().best_suggested_body.clone()
    }

    pub fn lowest_inserted_header(&self) -> Option<BlockHeader> {
        self.pointers.read().lowest_inserted_header.clone()
    }

    pub fn lowest_inserted_body_number(&self) -> Option<u64> {
        self.pointers.read().lowest_inserted_body_number
    }

    /// Highest height with a chain level.
    pub fn best_known_number(&self) -> u64 {
        self.pointers.read().best_known_number
    }

    fn raise_best_known(&self, number: u64) {
        let mut pointers = self.pointers.write();
        pointers.best_known_number = pointers.best_known_number.max(number);
    }

    fn lower_best_known(&self, number: u64) {
        let mut pointers = self.pointers.write();
        pointers.best_known_number = pointers.best_known_number.min(number);
    }

    fn update_metrics(&self) {
        let pointers = self.pointers.read();
        metrics::update_head_number(pointers.head.as_ref().map_or(0, Block::number));
        metrics::update_best_suggested_number(
            pointers.best_suggested_header.as_ref().map_or(0, |h| h.number),
        );
        metrics::update_best_known_number(pointers.best_known_number);
    }

    // ============ Acceptance ============

    pub fn can_accept_new_blocks(&self) -> bool {
        self.suspensions.load(Ordering::SeqCst) == 0
    }

    /// Rejects new blocks until the returned guard is dropped. Suspensions nest.
    pub fn suspend_new_blocks(&self) -> AcceptanceSuspension<'_> {
        self.suspensions.fetch_add(1, Ordering::SeqCst);
        AcceptanceSuspension {
            suspensions: &self.suspensions,
        }
    }

    fn is_marked_invalid(&self, number: u64, hash: &H256) -> bool {
        self.invalid_blocks
            .lock()
            .get(&number)
            .is_some_and(|hashes| hashes.contains(hash))
    }

    fn mark_invalid(&self, number: u64, hash: H256) {
        self.invalid_blocks
            .lock()
            .get_or_insert_mut(number, HashSet::new)
            .insert(hash);
    }

    // ============ Events ============

    pub fn on_new_best_suggested_block<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&NewBestSuggestedBlock) + Send + Sync + 'static,
    {
        self.events.new_best_suggested.subscribe(callback)
    }

    pub fn on_new_head_block<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&NewHeadBlock) + Send + Sync + 'static,
    {
        self.events.new_head.subscribe(callback)
    }

    pub fn on_block_added_to_main<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&BlockAddedToMain) + Send + Sync + 'static,
    {
        self.events.block_added_to_main.subscribe(callback)
    }

    // ============ Chain Levels ============

    /// Loads a level, treating heights above the best known one as absent.
    fn load_level(&self, number: u64) -> Result<Option<ChainLevelInfo>, StoreError> {
        if number > self.best_known_number() {
            return Ok(None);
        }
        self.store.level(number)
    }

    fn load_info(&self, number: u64, hash: &H256) -> Result<Option<(BlockInfo, ChainLevelInfo)>, StoreError> {
        Ok(self.store.level(number)?.and_then(|level| {
            let info = level.find(hash)?.clone();
            Some((info, level))
        }))
    }

    /// The level at `number` with `info` added, without persisting it.
    ///
    /// An entry already present keeps its position and processing flag and only takes
    /// the new weight. The canonical flag is never touched here.
    fn level_with(&self, number: u64, info: BlockInfo, first: bool) -> Result<ChainLevelInfo, StoreError> {
        let Some(mut level) = self.store.level(number)? else {
            return Ok(ChainLevelInfo::new(false, vec![info]));
        };
        match level.find_index(&info.block_hash) {
            Some(index) => level.block_infos[index].total_difficulty = info.total_difficulty,
            None => level.insert(info, first),
        }
        Ok(level)
    }

    /// Adds `info` to the level at `number`, creating the level if needed, and persists it.
    fn update_or_create_level(
        &self,
        number: u64,
        info: BlockInfo,
        first: bool,
    ) -> Result<ChainLevelInfo, StoreError> {
        let _guard = self.level_lock.lock();
        let level = self.level_with(number, info, first)?;
        let mut batch = self.store.write()?;
        batch.put_level(number, &level)?;
        batch.commit()?;
        self.raise_best_known(number);
        Ok(level)
    }

    fn total_difficulty(&self, header: &BlockHeader) -> Result<U256, BlockTreeError> {
        Ok(compute_total_difficulty(self, header)?)
    }

    // ============ Ingestion ============

    /// Stores a header received during sync, below the processed part of the chain.
    ///
    /// Its level is overwritten with this block as the only, canonical, entry.
    pub fn insert_header(&self, header: &BlockHeader) -> Result<AddBlockResult, BlockTreeError> {
        if !self.can_accept_new_blocks() {
            return Ok(AddBlockResult::CannotAccept);
        }
        if header.is_genesis() {
            return Err(BlockTreeError::InvalidOperation(
                "genesis block should not be inserted",
            ));
        }

        let mut header = header.clone();
        let total_difficulty = self.total_difficulty(&header)?;
        header.total_difficulty = Some(total_difficulty);
        let hash = header.hash();
        {
            let _guard = self.level_lock.lock();
            let level = ChainLevelInfo::new(true, vec![BlockInfo::new(hash, total_difficulty)]);
            let mut batch = self.store.write()?;
            batch.put_header(&header)?;
            batch.put_level(header.number, &level)?;
            batch.commit()?;
        }

        {
            let mut pointers = self.pointers.write();
            if pointers
                .lowest_inserted_header
                .as_ref()
                .is_none_or(|lowest| header.number < lowest.number)
            {
                pointers.lowest_inserted_header = Some(header.clone());
            }
            pointers.best_known_number = pointers.best_known_number.max(header.number);
            if pointers
                .best_suggested_header
                .as_ref()
                .is_none_or(|best| header.number > best.number)
            {
                pointers.best_suggested_header = Some(header);
            }
        }
        self.update_metrics();
        Ok(AddBlockResult::Added)
    }

    /// Stores the body of a block whose header is already in the tree.
    pub fn insert_block(&self, block: &Block) -> Result<AddBlockResult, BlockTreeError> {
        if !self.can_accept_new_blocks() {
            return Ok(AddBlockResult::CannotAccept);
        }
        if block.is_genesis() {
            return Err(BlockTreeError::InvalidOperation(
                "genesis block should not be inserted",
            ));
        }
        let mut batch = self.store.write()?;
        batch.put_block(block)?;
        batch.commit()?;
        Ok(AddBlockResult::Added)
    }

    /// Stores many bodies in one batch and lowers the lowest inserted body number.
    ///
    /// Returns how many bodies were written.
    pub fn insert_bodies(&self, blocks: &[Block]) -> Result<usize, BlockTreeError> {
        let _guard = self.batch_insert_lock.lock();
        if !self.can_accept_new_blocks() || blocks.is_empty() {
            return Ok(0);
        }
        if blocks.iter().any(Block::is_genesis) {
            return Err(BlockTreeError::InvalidOperation(
                "genesis block should not be inserted",
            ));
        }

        let lowest_in_batch = blocks.iter().map(Block::number).min();
        let lowest = match (self.lowest_inserted_body_number(), lowest_in_batch) {
            (Some(current), Some(new)) => Some(current.min(new)),
            (current, new) => current.or(new),
        };

        let mut batch = self.store.write()?;
        for block in blocks {
            batch.put_block(block)?;
        }
        batch.set_lowest_inserted_body_number(lowest)?;
        batch.commit()?;

        self.pointers.write().lowest_inserted_body_number = lowest;
        debug!(count = blocks.len(), lowest, "Inserted block bodies");
        Ok(blocks.len())
    }

    /// Overrides the lowest inserted body number, persisting it.
    pub fn set_lowest_inserted_body_number(&self, number: Option<u64>) -> Result<(), BlockTreeError> {
        let mut batch = self.store.write()?;
        batch.set_lowest_inserted_body_number(number)?;
        batch.commit()?;
        self.pointers.write().lowest_inserted_body_number = number;
        Ok(())
    }

    /// Offers a block to the tree.
    ///
    /// With `should_process` the block may become the best suggested body, which is
    /// announced so it gets processed, and it goes first in a level that has no canonical
    /// block yet. Only [`BlockTree::update_main_chain`] makes blocks canonical.
    pub fn suggest_block(&self, block: &Block, should_process: bool) -> Result<AddBlockResult, BlockTreeError> {
        if self.genesis().is_none() && !block.is_genesis() {
            return Err(BlockTreeError::GenesisNotSet);
        }
        self.suggest(Some(block), &block.header, should_process)
    }

    /// Offers a header without a body.
    pub fn suggest_header(&self, header: &BlockHeader) -> Result<AddBlockResult, BlockTreeError> {
        self.suggest(None, header, true)
    }

    fn suggest(
        &self,
        block: Option<&Block>,
        header: &BlockHeader,
        should_process: bool,
    ) -> Result<AddBlockResult, BlockTreeError> {
        if !self.can_accept_new_blocks() {
            return Ok(AddBlockResult::CannotAccept);
        }
        let hash = header.hash();
        let number = header.number;
        if self.is_marked_invalid(number, &hash) {
            debug!(number, hash = %ShortRoot(&hash.0), "Rejecting block known to be invalid");
            return Ok(AddBlockResult::InvalidBlock);
        }

        let is_known = self.is_known_block(number, &hash)?;
        let (best_suggested_number, best_suggested_difficulty) = {
            let pointers = self.pointers.read();
            let best = pointers.best_suggested_header.as_ref();
            (
                best.map_or(0, |h| h.number),
                best.and_then(|h| h.total_difficulty),
            )
        };
        if is_known && best_suggested_number >= number {
            trace!(number, hash = %ShortRoot(&hash.0), "Block already known");
            return Ok(AddBlockResult::AlreadyKnown);
        }
        if !header.is_genesis() && !self.is_known_block(number - 1, &header.parent_hash)? {
            trace!(
                number,
                hash = %ShortRoot(&hash.0),
                parent = %ShortRoot(&header.parent_hash.0),
                "Parent of suggested block is unknown"
            );
            return Ok(AddBlockResult::UnknownParent);
        }

        let mut header = header.clone();
        let total_difficulty = self.total_difficulty(&header)?;
        header.total_difficulty = Some(total_difficulty);

        if !is_known {
            let _guard = self.level_lock.lock();
            let info = BlockInfo::new(hash, total_difficulty);
            let level = self.level_with(number, info, should_process)?;
            let mut batch = self.store.write()?;
            if let Some(block) = block {
                batch.put_block(block)?;
            }
            batch.put_header(&header)?;
            batch.put_level(number, &level)?;
            batch.commit()?;
            self.raise_best_known(number);
        }

        let mut announce = None;
        if header.is_genesis() || is_heavier(total_difficulty, best_suggested_difficulty) {
            let mut pointers = self.pointers.write();
            if header.is_genesis() {
                pointers.genesis = Some(header.clone());
            }
            pointers.best_suggested_header = Some(header.clone());
            if let Some(block) = block.filter(|_| should_process) {
                let block = Block::new(header.clone(), block.body.clone());
                pointers.best_suggested_body = Some(block.clone());
                announce = Some(block);
            }
        }
        self.update_metrics();

        debug!(
            number,
            hash = %ShortRoot(&hash.0),
            %total_difficulty,
            best = announce.is_some(),
            "Added block to tree"
        );
        if let Some(block) = announce {
            self.events
                .new_best_suggested
                .emit(&NewBestSuggestedBlock { block });
        }
        Ok(AddBlockResult::Added)
    }

    // ============ Canonical Chain ============

    /// Makes a contiguous run of blocks canonical.
    ///
    /// Levels above the run that were canonical under the previous head lose their
    /// canonical flag. Each block moves to the front of its level, and becomes the head
    /// when it is genesis or heavier than the head and `were_processed` is set. All level
    /// changes and the head pointer are written in one batch; notifications follow the
    /// commit and run without the level lock held.
    pub fn update_main_chain(&self, blocks: &[Block], were_processed: bool) -> Result<(), BlockTreeError> {
        let (Some(first), Some(last)) = (blocks.first(), blocks.last()) else {
            return Ok(());
        };
        let ascending = last.number() >= first.number();
        let contiguous = blocks.windows(2).all(|pair| {
            if ascending {
                pair[1].number() == pair[0].number() + 1
            } else {
                pair[0].number() == pair[1].number() + 1
            }
        });
        if !contiguous {
            return Err(BlockTreeError::InvalidOperation(
                "main chain update requires a contiguous run of blocks",
            ));
        }
        let last_number = if ascending { last.number() } else { first.number() };

        let guard = self.level_lock.lock();
        let (previous_head_number, mut head_difficulty) = {
            let pointers = self.pointers.read();
            let head = pointers.head.as_ref();
            (head.map_or(0, Block::number), head.and_then(Block::total_difficulty))
        };

        let mut batch = self.store.write()?;
        let mut demoted = 0;
        for number in (last_number + 1)..=previous_head_number {
            let Some(mut level) = self.store.level(number)? else {
                continue;
            };
            level.has_block_on_main_chain = false;
            batch.put_level(number, &level)?;
            demoted += 1;
        }
        if demoted > 0 {
            debug!(from = last_number + 1, to = previous_head_number, "Removing levels from main chain");
        }

        let mut announcements = Vec::with_capacity(blocks.len());
        let mut new_genesis = None;
        let mut new_head = None;
        for block in blocks {
            let hash = block.hash();
            let number = block.number();
            let mut level = self
                .store
                .level(number)?
                .ok_or(BlockTreeError::UnknownBlock(hash))?;
            let index = level
                .find_index(&hash)
                .ok_or(BlockTreeError::UnknownBlock(hash))?;
            let previous_main = level.main_chain_block().map(|info| info.block_hash);

            level.block_infos[index].was_processed = were_processed;
            level.block_infos.swap(0, index);
            level.has_block_on_main_chain = true;
            batch.put_level(number, &level)?;

            let mut block = block.clone();
            let total_difficulty = match block.total_difficulty() {
                Some(td) => td,
                None => level.block_infos[0].total_difficulty,
            };
            block.header.total_difficulty = Some(total_difficulty);
            if self.should_cache(number) {
                self.store.cache_block(block.clone());
                self.store.cache_header(block.header.clone());
            }

            let previous = match previous_main {
                Some(previous) if previous != hash => {
                    self.find_block(&previous, LookupOptions::TOTAL_DIFFICULTY_NOT_NEEDED)?
                }
                _ => None,
            };

            let mut becomes_head = false;
            if block.is_genesis() || is_heavier(total_difficulty, head_difficulty) {
                if block.is_genesis() {
                    new_genesis = Some(block.header.clone());
                }
                if were_processed {
                    batch.set_head(&hash)?;
                    head_difficulty = Some(total_difficulty);
                    new_head = Some(block.clone());
                    becomes_head = true;
                }
            }
            announcements.push((BlockAddedToMain { block, previous }, becomes_head));
        }
        batch.commit()?;

        {
            let mut pointers = self.pointers.write();
            if let Some(genesis) = new_genesis {
                pointers.genesis = Some(genesis);
            }
            if let Some(head) = new_head {
                info!(
                    number = head.number(),
                    hash = %ShortRoot(&head.hash().0),
                    total_difficulty = ?head.total_difficulty(),
                    "New head block"
                );
                pointers.head = Some(head);
            }
        }
        if demoted > 0 {
            metrics::inc_main_chain_reorgs();
        }
        self.update_metrics();
        drop(guard);

        for (event, becomes_head) in announcements {
            let head = becomes_head.then(|| event.block.clone());
            self.events.block_added_to_main.emit(&event);
            if let Some(block) = head {
                self.events.new_head.emit(&NewHeadBlock { block });
            }
        }
        Ok(())
    }

    /// Moves the head to `block` and persists it. Announcing the change is left to the
    /// caller, once it has released the level lock.
    fn set_head_block(&self, block: &Block) -> Result<(), BlockTreeError> {
        let mut batch = self.store.write()?;
        batch.set_head(&block.hash())?;
        batch.commit()?;
        {
            let mut pointers = self.pointers.write();
            if block.is_genesis() {
                pointers.genesis = Some(block.header.clone());
            }
            pointers.head = Some(block.clone());
        }
        self.update_metrics();
        Ok(())
    }
}

impl WeightSource for BlockTree {
    fn header(&self, hash: &H256) -> Result<Option<BlockHeader>, ForkChoiceError> {
        Ok(self.store.header(hash)?)
    }

    fn recorded_total_difficulty(&self, header: &BlockHeader) -> Result<Option<U256>, ForkChoiceError> {
        Ok(self
            .load_info(header.number, &header.hash())?
            .map(|(info, _)| info.total_difficulty))
    }

    fn record(&self, header: &BlockHeader, total_difficulty: U256) -> Result<(), ForkChoiceError> {
        self.update_or_create_level(
            header.number,
            BlockInfo::new(header.hash(), total_difficulty),
            false,
        )?;
        Ok(())
    }
}
