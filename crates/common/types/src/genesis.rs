use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    block::{Block, BlockBody, BlockHeader, ExtraData},
    primitives::{Address, H256, U256},
    state::{self, Account},
};

/// Initial chain configuration, as read from a genesis JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genesis {
    pub difficulty: U256,
    #[serde(default)]
    pub gas_limit: u64,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub beneficiary: Address,
    #[serde(default)]
    pub extra_data: String,
    /// Pre-funded accounts.
    #[serde(default)]
    pub alloc: BTreeMap<Address, Account>,
}

impl Genesis {
    /// Root of the state described by `alloc`.
    pub fn state_root(&self) -> H256 {
        state::snapshot(&self.alloc)
            .map(|snapshot| state::state_root(&snapshot))
            .unwrap_or_default()
    }

    pub fn header(&self) -> BlockHeader {
        let mut extra = self.extra_data.as_bytes().to_vec();
        extra.truncate(32);
        BlockHeader {
            beneficiary: self.beneficiary,
            state_root: self.state_root(),
            difficulty: self.difficulty,
            number: 0,
            gas_limit: self.gas_limit,
            timestamp: self.timestamp,
            extra_data: ExtraData::new(extra).unwrap_or_default(),
            ..Default::default()
        }
    }

    pub fn block(&self) -> Block {
        Block::new(self.header(), BlockBody::default())
    }
}
