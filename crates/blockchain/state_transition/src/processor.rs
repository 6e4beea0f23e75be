use std::borrow::Cow;
use std::sync::Arc;

use ethtree_storage::ChainStore;
use ethtree_types::{
    ShortRoot,
    block::{Block, BlockHeader, Transaction},
    listeners::{Listeners, Subscription},
    primitives::H256,
    receipt::{Receipt, receipts_root},
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    ProcessingError, ProcessingOptions, ProcessorConfig, metrics,
    executor::TransactionExecutor,
    rewards::RewardCalculator,
    tracers::{BlockTracer, ReceiptsTracer},
    tx_pool::TxPool,
    validator::BlockValidator,
    world_state::WorldState,
};

/// Branches longer than this get periodic progress logs.
const LONG_BRANCH_THRESHOLD: usize = 64;
const LONG_BRANCH_LOG_INTERVAL: usize = 8;

/// Emitted once per block of a committed branch.
#[derive(Debug, Clone)]
pub struct BlockProcessedEvent {
    pub block: Block,
    pub receipts: Vec<Receipt>,
}

/// Emitted once per transaction of a committed branch.
#[derive(Debug, Clone)]
pub struct TransactionProcessedEvent {
    pub block_hash: H256,
    pub index: usize,
    pub transaction: Transaction,
    pub receipt: Receipt,
}

/// Output of a successful branch run, before it is made durable.
struct ProcessedBranch {
    blocks: Vec<Block>,
    receipts: Vec<Vec<Receipt>>,
}

/// Executes runs of blocks with all-or-nothing semantics.
///
/// Only one run executes at a time; the world state stays locked for the whole run.
pub struct BranchProcessor {
    store: Arc<ChainStore>,
    state: Mutex<WorldState>,
    executor: Arc<dyn TransactionExecutor>,
    rewards: Arc<dyn RewardCalculator>,
    validator: Arc<dyn BlockValidator>,
    tx_pool: Option<Arc<dyn TxPool>>,
    config: ProcessorConfig,
    block_processed: Listeners<BlockProcessedEvent>,
    transaction_processed: Listeners<TransactionProcessedEvent>,
}

impl BranchProcessor {
    pub fn new(
        store: Arc<ChainStore>,
        state: WorldState,
        executor: Arc<dyn TransactionExecutor>,
        rewards: Arc<dyn RewardCalculator>,
        validator: Arc<dyn BlockValidator>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            state: Mutex::new(state),
            executor,
            rewards,
            validator,
            tx_pool: None,
            config,
            block_processed: Listeners::new(),
            transaction_processed: Listeners::new(),
        }
    }

    /// Transactions of committed blocks get removed from `tx_pool`.
    pub fn with_tx_pool(mut self, tx_pool: Arc<dyn TxPool>) -> Self {
        self.tx_pool = Some(tx_pool);
        self
    }

    pub fn state_root(&self) -> H256 {
        self.state.lock().state_root()
    }

    /// Runs `f` with exclusive access to the live state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut WorldState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn on_block_processed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&BlockProcessedEvent) + Send + Sync + 'static,
    {
        self.block_processed.subscribe(callback)
    }

    pub fn on_transaction_processed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TransactionProcessedEvent) + Send + Sync + 'static,
    {
        self.transaction_processed.subscribe(callback)
    }

    /// Executes `suggested_blocks` in order on top of `target_state_root`.
    ///
    /// Returns the executed blocks. On any failure the state is restored to what it was
    /// before the call and nothing is persisted. Read-only runs restore it on success too.
    pub fn process(
        &self,
        target_state_root: H256,
        suggested_blocks: &[Block],
        options: ProcessingOptions,
        tracer: &mut dyn BlockTracer,
    ) -> Result<Vec<Block>, ProcessingError> {
        let timing = metrics::time_branch_processing();
        let mut state = self.state.lock();

        if state.has_uncommitted_changes() {
            error!(
                root = %ShortRoot(&state.state_root().0),
                "Uncommitted state changes found at the start of a branch"
            );
        }
        let checkpoint = state.state_root();

        let result = self
            .run_branch(&mut state, target_state_root, suggested_blocks, options, tracer)
            .and_then(|branch| {
                if options.read_only_chain {
                    state.restore(checkpoint)?;
                } else {
                    self.commit_branch(&mut state, &branch, options)?;
                }
                Ok(branch)
            });

        match result {
            Ok(branch) => {
                drop(state);
                debug!(
                    blocks = branch.blocks.len(),
                    read_only = options.read_only_chain,
                    elapsed_ms = timing.elapsed().as_millis() as u64,
                    "Branch processed"
                );
                if !options.read_only_chain {
                    self.after_commit(&branch);
                }
                Ok(branch.blocks)
            }
            Err(err) => {
                warn!(%err, checkpoint = %ShortRoot(&checkpoint.0), "Branch processing failed, restoring state");
                if let Err(restore_err) = state.restore(checkpoint) {
                    error!(%restore_err, "Failed to restore state after branch failure");
                }
                Err(err)
            }
        }
    }

    fn run_branch(
        &self,
        state: &mut WorldState,
        target_state_root: H256,
        suggested_blocks: &[Block],
        options: ProcessingOptions,
        tracer: &mut dyn BlockTracer,
    ) -> Result<ProcessedBranch, ProcessingError> {
        self.init_branch(state, target_state_root)?;

        let total = suggested_blocks.len();
        let mut branch = ProcessedBranch {
            blocks: Vec::with_capacity(total),
            receipts: Vec::with_capacity(total),
        };
        for (i, suggested) in suggested_blocks.iter().enumerate() {
            if total > LONG_BRANCH_THRESHOLD && i % LONG_BRANCH_LOG_INTERVAL == 0 {
                info!(
                    processed = i,
                    total,
                    number = suggested.number(),
                    "Processing part of a long blocks branch"
                );
            }
            let (processed, receipts) = self.process_one(state, suggested, options, tracer)?;
            branch.blocks.push(processed);
            branch.receipts.push(receipts);
        }
        Ok(branch)
    }

    /// Switches the live state to the branch's starting root.
    ///
    /// Any cached state may belong to an abandoned branch, so it's all dropped.
    fn init_branch(&self, state: &mut WorldState, target_state_root: H256) -> Result<(), ProcessingError> {
        if target_state_root != state.state_root() {
            debug!(
                from = %ShortRoot(&state.state_root().0),
                to = %ShortRoot(&target_state_root.0),
                "Switching state root for branch"
            );
            metrics::inc_reorganizations();
            state.reset_to(target_state_root)?;
        }
        Ok(())
    }

    fn process_one(
        &self,
        state: &mut WorldState,
        suggested: &Block,
        options: ProcessingOptions,
        tracer: &mut dyn BlockTracer,
    ) -> Result<(Block, Vec<Receipt>), ProcessingError> {
        self.apply_irregular_state_change(state, suggested.number())?;

        let mut header = prepare_header(&suggested.header);
        tracer.start_new_block_trace(suggested);

        let receipts = {
            let mut receipts_tracer = ReceiptsTracer::new(header.number, &mut *tracer);
            for (index, tx) in suggested.transactions().iter().enumerate() {
                let tx = if options.do_not_verify_nonce {
                    let mut adjusted = tx.clone();
                    adjusted.nonce = state.nonce(&tx.sender);
                    Cow::Owned(adjusted)
                } else {
                    Cow::Borrowed(tx)
                };
                receipts_tracer.start_new_tx_trace(&tx);
                self.executor
                    .execute(&tx, &header, state, &mut receipts_tracer)
                    .map_err(|source| ProcessingError::InvalidTransaction {
                        hash: suggested.hash(),
                        index,
                        source,
                    })?;
                receipts_tracer.end_tx_trace();
                header.gas_used = receipts_tracer.cumulative_gas_used();
            }
            receipts_tracer.into_receipts()
        };
        header.receipts_root = receipts_root(&receipts);

        self.apply_rewards(state, suggested, tracer);
        header.state_root = state.commit_tree()?;
        tracer.end_block_trace();

        let processed = Block::new(header, suggested.body.clone());
        if !options.no_validation
            && !self
                .validator
                .validate_processed_block(&processed, &receipts, suggested)
        {
            error!(
                number = suggested.number(),
                hash = %ShortRoot(&suggested.hash().0),
                "Processed block is not valid"
            );
            return Err(ProcessingError::InvalidBlock {
                hash: suggested.hash(),
            });
        }
        Ok((processed, receipts))
    }

    fn apply_irregular_state_change(
        &self,
        state: &mut WorldState,
        number: u64,
    ) -> Result<(), ProcessingError> {
        let Some(change) = &self.config.irregular_state_change else {
            return Ok(());
        };
        if change.block_number != number {
            return Ok(());
        }
        info!(number, drained = change.drained_accounts.len(), "Applying irregular state change");
        for account in &change.drained_accounts {
            let balance = state.balance(account);
            if balance.is_zero() {
                continue;
            }
            state.subtract_from_balance(*account, balance)?;
            state.add_to_balance(change.withdraw_account, balance);
        }
        Ok(())
    }

    fn apply_rewards(&self, state: &mut WorldState, block: &Block, tracer: &mut dyn BlockTracer) {
        for reward in self.rewards.calculate_rewards(block) {
            if tracer.is_tracing_rewards() {
                tracer.report_reward(reward.address, reward.kind, reward.value);
            }
            state.add_to_balance(reward.address, reward.value);
        }
    }

    /// Persists the branch state and, if requested, its receipts in one batch.
    fn commit_branch(
        &self,
        state: &mut WorldState,
        branch: &ProcessedBranch,
        options: ProcessingOptions,
    ) -> Result<(), ProcessingError> {
        let mut batch = self.store.write()?;
        state.stage_into(&mut batch)?;
        if options.store_receipts {
            for (block, receipts) in branch.blocks.iter().zip(&branch.receipts) {
                batch.put_receipts(&block.hash(), receipts)?;
            }
        }
        batch.commit()?;
        Ok(())
    }

    fn after_commit(&self, branch: &ProcessedBranch) {
        let transactions: usize = branch.blocks.iter().map(|b| b.transactions().len()).sum();
        metrics::inc_processed(branch.blocks.len() as u64, transactions as u64);

        for (block, receipts) in branch.blocks.iter().zip(&branch.receipts) {
            let hash = block.hash();
            if let Some(tx_pool) = &self.tx_pool {
                for tx in block.transactions() {
                    tx_pool.remove_transaction(&tx.hash(), block.number());
                }
            }
            for (index, (transaction, receipt)) in
                block.transactions().iter().zip(receipts).enumerate()
            {
                self.transaction_processed.emit(&TransactionProcessedEvent {
                    block_hash: hash,
                    index,
                    transaction: transaction.clone(),
                    receipt: receipt.clone(),
                });
            }
            self.block_processed.emit(&BlockProcessedEvent {
                block: block.clone(),
                receipts: receipts.clone(),
            });
        }
    }
}

/// Working copy of a suggested header, with gas usage to be recomputed.
fn prepare_header(suggested: &BlockHeader) -> BlockHeader {
    BlockHeader {
        gas_used: 0,
        ..suggested.clone()
    }
}
