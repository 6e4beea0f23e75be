//! Metrics utilities and prometheus re-exports for ethtree.

pub mod gather;
pub mod timing;

pub use gather::{GatherError, gather_default_metrics};
pub use timing::TimingGuard;

// Re-export prometheus types and macros we use
pub use prometheus::{
    Encoder, Error as PrometheusError, Histogram, IntCounter, IntGauge, TextEncoder, gather,
    register_histogram, register_int_counter, register_int_gauge,
};

/// Converts a block number to a gauge value, saturating at `i64::MAX`.
pub fn block_number_gauge(number: u64) -> i64 {
    i64::try_from(number).unwrap_or(i64::MAX)
}
