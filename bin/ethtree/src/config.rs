use std::path::Path;

use ethtree_blockchain::BlockTreeConfig;
use ethtree_state_transition::ProcessorConfig;
use ethtree_types::primitives::U256;
use serde::{Deserialize, Serialize};

use crate::CliError;

/// Node settings, read from a JSON file. Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub block_tree: BlockTreeConfig,
    pub processor: ProcessorConfig,
    /// Capacity of the store's header and block caches.
    pub store_cache_size: usize,
    pub block_reward: U256,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            block_tree: BlockTreeConfig::default(),
            processor: ProcessorConfig::default(),
            store_cache_size: 128,
            block_reward: U256::from(2_000_000_000_000_000_000u64),
        }
    }
}

/// Command line values that take precedence over the config file.
#[derive(Debug, Default, Clone, clap::Args)]
pub struct ConfigOverrides {
    /// Capacity of the block tree's header and block caches
    #[arg(long)]
    pub cache_size: Option<usize>,
    /// Number of heights remembered by the invalid-block cache
    #[arg(long)]
    pub invalid_blocks_cache_levels: Option<usize>,
    /// Ceiling of the startup search for the best known level
    #[arg(long)]
    pub best_known_search_limit: Option<u64>,
    /// Fast sync pivot block number
    #[arg(long)]
    pub pivot_number: Option<u64>,
    /// Largest height range a single slice deletion may remove
    #[arg(long)]
    pub max_delete_slice: Option<u64>,
    /// Capacity of the store's header and block caches
    #[arg(long)]
    pub store_cache_size: Option<usize>,
    /// Block reward in wei
    #[arg(long)]
    pub block_reward: Option<U256>,
}

impl NodeConfig {
    /// Reads the config file, if any, then applies the command line overrides.
    pub fn resolve(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, CliError> {
        let mut config = Self::load(path)?;
        config.apply(overrides);
        Ok(config)
    }

    fn apply(&mut self, overrides: &ConfigOverrides) {
        let tree = &mut self.block_tree;
        if let Some(cache_size) = overrides.cache_size {
            tree.cache_size = cache_size;
        }
        if let Some(levels) = overrides.invalid_blocks_cache_levels {
            tree.invalid_blocks_cache_levels = levels;
        }
        if let Some(limit) = overrides.best_known_search_limit {
            tree.best_known_search_limit = limit;
        }
        if let Some(pivot_number) = overrides.pivot_number {
            tree.pivot_number = pivot_number;
        }
        if let Some(max_delete_slice) = overrides.max_delete_slice {
            tree.max_delete_slice = max_delete_slice;
        }
        if let Some(store_cache_size) = overrides.store_cache_size {
            self.store_cache_size = store_cache_size;
        }
        if let Some(block_reward) = overrides.block_reward {
            self.block_reward = block_reward;
        }
    }

    pub fn load(path: Option<&Path>) -> Result<Self, CliError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path).map_err(|source| CliError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| CliError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
