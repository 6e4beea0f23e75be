//! Utilities for gathering and encoding metrics.

use thiserror::Error;

use crate::{Encoder, PrometheusError, TextEncoder, gather};

#[derive(Debug, Error)]
pub enum GatherError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] PrometheusError),
    #[error("UTF-8 conversion error: {0}")]
    FromUtf8(#[from] std::string::FromUtf8Error),
}

/// Returns all metrics currently registered in Prometheus' default registry,
/// in the text exposition format.
///
/// Block tree and block processor metrics both register with the default registry.
pub fn gather_default_metrics() -> Result<String, GatherError> {
    let encoder = TextEncoder::new();
    let metric_families = gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;

    let res = String::from_utf8(buffer)?;

    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_int_counter;

    #[test]
    fn gathered_text_includes_registered_counter() {
        let counter =
            register_int_counter!("ethtree_test_gather_total", "Gather test counter").unwrap();
        counter.inc();
        let text = gather_default_metrics().unwrap();
        assert!(text.contains("ethtree_test_gather_total 1"));
    }
}
