//! Prometheus metrics for the block tree.

use ethtree_metrics::block_number_gauge;

pub fn update_head_number(number: u64) {
    static ETHTREE_HEAD_NUMBER: std::sync::LazyLock<prometheus::IntGauge> =
        std::sync::LazyLock::new(|| {
            prometheus::register_int_gauge!("ethtree_head_number", "Number of the head block")
                .unwrap()
        });
    ETHTREE_HEAD_NUMBER.set(block_number_gauge(number));
}

pub fn update_best_suggested_number(number: u64) {
    static ETHTREE_BEST_SUGGESTED_NUMBER: std::sync::LazyLock<prometheus::IntGauge> =
        std::sync::LazyLock::new(|| {
            prometheus::register_int_gauge!(
                "ethtree_best_suggested_number",
                "Number of the best suggested header"
            )
            .unwrap()
        });
    ETHTREE_BEST_SUGGESTED_NUMBER.set(block_number_gauge(number));
}

pub fn update_best_known_number(number: u64) {
    static ETHTREE_BEST_KNOWN_NUMBER: std::sync::LazyLock<prometheus::IntGauge> =
        std::sync::LazyLock::new(|| {
            prometheus::register_int_gauge!(
                "ethtree_best_known_number",
                "Highest height with a known chain level"
            )
            .unwrap()
        });
    ETHTREE_BEST_KNOWN_NUMBER.set(block_number_gauge(number));
}

pub fn inc_invalid_blocks_deleted() {
    static ETHTREE_INVALID_BLOCKS_DELETED_TOTAL: std::sync::LazyLock<prometheus::IntCounter> =
        std::sync::LazyLock::new(|| {
            prometheus::register_int_counter!(
                "ethtree_invalid_blocks_deleted_total",
                "Count of blocks removed by invalid branch deletion"
            )
            .unwrap()
        });
    ETHTREE_INVALID_BLOCKS_DELETED_TOTAL.inc();
}

/// Count a main chain update that took the canonical flag away from higher levels.
pub fn inc_main_chain_reorgs() {
    static ETHTREE_MAIN_CHAIN_REORGS_TOTAL: std::sync::LazyLock<prometheus::IntCounter> =
        std::sync::LazyLock::new(|| {
            prometheus::register_int_counter!(
                "ethtree_main_chain_reorgs_total",
                "Count of main chain updates that demoted previously canonical levels"
            )
            .unwrap()
        });
    ETHTREE_MAIN_CHAIN_REORGS_TOTAL.inc();
}
