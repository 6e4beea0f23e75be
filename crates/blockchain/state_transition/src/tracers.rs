//! Observers of block execution.
//!
//! The branch processor always executes through a [`ReceiptsTracer`], which builds the
//! block receipts and forwards every event to a caller-supplied tracer.

use ethtree_types::{
    block::{Block, Transaction},
    primitives::{Address, H256, U256},
    receipt::Receipt,
};

use crate::rewards::RewardKind;

/// Receives events while a block executes. Every method defaults to doing nothing.
pub trait BlockTracer: Send {
    /// Whether [`BlockTracer::report_reward`] should be called.
    fn is_tracing_rewards(&self) -> bool {
        false
    }

    fn report_reward(&mut self, _author: Address, _kind: RewardKind, _value: U256) {}

    fn start_new_block_trace(&mut self, _block: &Block) {}

    fn start_new_tx_trace(&mut self, _tx: &Transaction) {}

    /// The current transaction executed successfully.
    fn mark_as_success(&mut self, _recipient: Address, _gas_spent: u64) {}

    /// The current transaction was included but its effects were reverted.
    fn mark_as_failed(&mut self, _recipient: Address, _gas_spent: u64, _error: &str) {}

    fn end_tx_trace(&mut self) {}

    fn end_block_trace(&mut self) {}
}

/// A tracer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBlockTracer;

impl BlockTracer for NullBlockTracer {}

/// Fans events out to several tracers, in order.
#[derive(Default)]
pub struct CompositeBlockTracer {
    tracers: Vec<Box<dyn BlockTracer>>,
}

impl CompositeBlockTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, tracer: Box<dyn BlockTracer>) {
        self.tracers.push(tracer);
    }

    pub fn into_inner(self) -> Vec<Box<dyn BlockTracer>> {
        self.tracers
    }
}

impl BlockTracer for CompositeBlockTracer {
    fn is_tracing_rewards(&self) -> bool {
        self.tracers.iter().any(|t| t.is_tracing_rewards())
    }

    fn report_reward(&mut self, author: Address, kind: RewardKind, value: U256) {
        for tracer in self.tracers.iter_mut().filter(|t| t.is_tracing_rewards()) {
            tracer.report_reward(author, kind, value);
        }
    }

    fn start_new_block_trace(&mut self, block: &Block) {
        self.tracers
            .iter_mut()
            .for_each(|t| t.start_new_block_trace(block));
    }

    fn start_new_tx_trace(&mut self, tx: &Transaction) {
        self.tracers.iter_mut().for_each(|t| t.start_new_tx_trace(tx));
    }

    fn mark_as_success(&mut self, recipient: Address, gas_spent: u64) {
        self.tracers
            .iter_mut()
            .for_each(|t| t.mark_as_success(recipient, gas_spent));
    }

    fn mark_as_failed(&mut self, recipient: Address, gas_spent: u64, error: &str) {
        self.tracers
            .iter_mut()
            .for_each(|t| t.mark_as_failed(recipient, gas_spent, error));
    }

    fn end_tx_trace(&mut self) {
        self.tracers.iter_mut().for_each(|t| t.end_tx_trace());
    }

    fn end_block_trace(&mut self) {
        self.tracers.iter_mut().for_each(|t| t.end_block_trace());
    }
}

/// Builds one receipt per executed transaction.
pub struct ReceiptsTracer<'a> {
    block_number: u64,
    receipts: Vec<Receipt>,
    current_tx: Option<H256>,
    cumulative_gas_used: u64,
    other: &'a mut dyn BlockTracer,
}

impl<'a> ReceiptsTracer<'a> {
    pub fn new(block_number: u64, other: &'a mut dyn BlockTracer) -> Self {
        Self {
            block_number,
            receipts: Vec::new(),
            current_tx: None,
            cumulative_gas_used: 0,
            other,
        }
    }

    pub fn cumulative_gas_used(&self) -> u64 {
        self.cumulative_gas_used
    }

    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    pub fn into_receipts(self) -> Vec<Receipt> {
        self.receipts
    }

    fn push_receipt(&mut self, success: bool, gas_used: u64) {
        self.cumulative_gas_used = self.cumulative_gas_used.saturating_add(gas_used);
        let index = u32::try_from(self.receipts.len()).unwrap_or(u32::MAX);
        self.receipts.push(Receipt {
            tx_hash: self.current_tx.unwrap_or_default(),
            block_number: self.block_number,
            index,
            success,
            gas_used,
            cumulative_gas_used: self.cumulative_gas_used,
        });
    }
}

impl BlockTracer for ReceiptsTracer<'_> {
    fn is_tracing_rewards(&self) -> bool {
        self.other.is_tracing_rewards()
    }

    fn report_reward(&mut self, author: Address, kind: RewardKind, value: U256) {
        self.other.report_reward(author, kind, value);
    }

    fn start_new_block_trace(&mut self, block: &Block) {
        self.other.start_new_block_trace(block);
    }

    fn start_new_tx_trace(&mut self, tx: &Transaction) {
        self.current_tx = Some(tx.hash());
        self.other.start_new_tx_trace(tx);
    }

    fn mark_as_success(&mut self, recipient: Address, gas_spent: u64) {
        self.push_receipt(true, gas_spent);
        self.other.mark_as_success(recipient, gas_spent);
    }

    fn mark_as_failed(&mut self, recipient: Address, gas_spent: u64, error: &str) {
        self.push_receipt(false, gas_spent);
        self.other.mark_as_failed(recipient, gas_spent, error);
    }

    fn end_tx_trace(&mut self) {
        self.current_tx = None;
        self.other.end_tx_trace();
    }

    fn end_block_trace(&mut self) {
        self.other.end_block_trace();
    }
}
