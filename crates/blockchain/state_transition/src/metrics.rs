//! Prometheus metrics for branch processing.

use std::sync::LazyLock;

use ethtree_metrics::TimingGuard;
use prometheus::{Histogram, IntCounter, register_histogram, register_int_counter};

static ETHTREE_REORGANIZATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "ethtree_reorganizations_total",
        "Count of branch runs that started from a state root other than the live one"
    )
    .unwrap()
});

static ETHTREE_BLOCKS_PROCESSED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "ethtree_blocks_processed_total",
        "Count of blocks executed and committed"
    )
    .unwrap()
});

static ETHTREE_TRANSACTIONS_PROCESSED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "ethtree_transactions_processed_total",
        "Count of transactions executed in committed blocks"
    )
    .unwrap()
});

static ETHTREE_BRANCH_PROCESSING_TIME_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "ethtree_branch_processing_time_seconds",
        "Duration to process a branch of blocks",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap()
});

pub fn inc_reorganizations() {
    ETHTREE_REORGANIZATIONS_TOTAL.inc();
}

pub fn reorganizations() -> u64 {
    ETHTREE_REORGANIZATIONS_TOTAL.get()
}

/// Increment the committed block and transaction counters.
pub fn inc_processed(blocks: u64, transactions: u64) {
    ETHTREE_BLOCKS_PROCESSED_TOTAL.inc_by(blocks);
    ETHTREE_TRANSACTIONS_PROCESSED_TOTAL.inc_by(transactions);
}

/// Start timing a branch run. The duration is recorded when the guard drops.
pub fn time_branch_processing() -> TimingGuard {
    TimingGuard::new(&ETHTREE_BRANCH_PROCESSING_TIME_SECONDS)
}
