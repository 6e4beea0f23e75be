use ethtree_types::block::{BlockHeader, Transaction};

use crate::{ExecutionError, tracers::BlockTracer, world_state::WorldState};

/// Base cost of every transaction.
pub const TX_BASE_GAS: u64 = 21_000;
const TX_DATA_ZERO_GAS: u64 = 4;
const TX_DATA_NON_ZERO_GAS: u64 = 16;

/// Executes a single transaction against the live state.
///
/// `header.gas_used` holds the gas spent by the preceding transactions of the block.
/// Implementations report the outcome through `tracer`, exactly once per transaction
/// included in the block. An `Err` means the transaction can't be included at all,
/// which makes the block invalid.
pub trait TransactionExecutor: Send + Sync {
    fn execute(
        &self,
        tx: &Transaction,
        header: &BlockHeader,
        state: &mut WorldState,
        tracer: &mut dyn BlockTracer,
    ) -> Result<(), ExecutionError>;
}

/// Gas charged before any execution happens.
pub fn intrinsic_gas(tx: &Transaction) -> u64 {
    tx.data.iter().fold(TX_BASE_GAS, |gas, byte| {
        gas.saturating_add(if *byte == 0 {
            TX_DATA_ZERO_GAS
        } else {
            TX_DATA_NON_ZERO_GAS
        })
    })
}

/// Executes plain value transfers.
///
/// A transfer the sender can't afford is still included: it spends its intrinsic gas and
/// bumps the sender nonce, but moves no value.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferExecutor;

impl TransactionExecutor for TransferExecutor {
    fn execute(
        &self,
        tx: &Transaction,
        header: &BlockHeader,
        state: &mut WorldState,
        tracer: &mut dyn BlockTracer,
    ) -> Result<(), ExecutionError> {
        let intrinsic = intrinsic_gas(tx);
        if tx.gas_limit < intrinsic {
            return Err(ExecutionError::IntrinsicGasTooLow {
                intrinsic,
                gas_limit: tx.gas_limit,
            });
        }
        if header.gas_used.saturating_add(tx.gas_limit) > header.gas_limit {
            return Err(ExecutionError::BlockGasLimitExceeded {
                used: header.gas_used,
                requested: tx.gas_limit,
                limit: header.gas_limit,
            });
        }
        let expected = state.nonce(&tx.sender);
        if tx.nonce != expected {
            return Err(ExecutionError::InvalidNonce {
                sender: tx.sender,
                expected,
                actual: tx.nonce,
            });
        }

        state.increment_nonce(tx.sender);
        match state.subtract_from_balance(tx.sender, tx.value) {
            Ok(()) => {
                state.add_to_balance(tx.to, tx.value);
                tracer.mark_as_success(tx.to, intrinsic);
            }
            Err(err) => tracer.mark_as_failed(tx.to, intrinsic, &err.to_string()),
        }
        Ok(())
    }
}
