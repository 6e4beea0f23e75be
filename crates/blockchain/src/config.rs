use serde::{Deserialize, Serialize};

/// Tuning knobs of the block tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockTreeConfig {
    /// Capacity of the header and block caches, and width of the cached region below head.
    pub cache_size: usize,
    /// Number of heights remembered by the invalid-block cache.
    pub invalid_blocks_cache_levels: usize,
    /// How far above its starting point the startup search for the best known level looks.
    pub best_known_search_limit: u64,
    /// Fast sync pivot. Bounds the search for the lowest inserted header.
    pub pivot_number: u64,
    /// Largest height range a single `delete_chain_slice` call may remove.
    pub max_delete_slice: u64,
}

impl Default for BlockTreeConfig {
    fn default() -> Self {
        Self {
            cache_size: 64,
            invalid_blocks_cache_levels: 128,
            best_known_search_limit: 256_000_000,
            pivot_number: 0,
            max_delete_slice: 50_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: BlockTreeConfig = serde_json::from_str(r#"{ "pivot_number": 1000 }"#).unwrap();
        assert_eq!(config.pivot_number, 1000);
        assert_eq!(config.cache_size, 64);
        assert_eq!(config.max_delete_slice, 50_000);
    }
}
