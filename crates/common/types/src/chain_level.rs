use ssz_derive::{Decode, Encode};

use crate::primitives::{H256, U256};

/// Fork-choice bookkeeping for a single block.
///
/// The block number is implied by the [`ChainLevelInfo`] holding the entry.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct BlockInfo {
    pub block_hash: H256,
    /// Sum of the difficulty of the block and all of its ancestors.
    pub total_difficulty: U256,
    /// Whether the block was executed against state.
    pub was_processed: bool,
}

impl BlockInfo {
    pub fn new(block_hash: H256, total_difficulty: U256) -> Self {
        Self {
            block_hash,
            total_difficulty,
            was_processed: false,
        }
    }
}

/// All known blocks at a given height.
///
/// When `has_block_on_main_chain` is set, the entry at index 0 is the canonical block
/// for this height.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct ChainLevelInfo {
    pub has_block_on_main_chain: bool,
    pub block_infos: Vec<BlockInfo>,
}

impl ChainLevelInfo {
    pub fn new(has_block_on_main_chain: bool, block_infos: Vec<BlockInfo>) -> Self {
        Self {
            has_block_on_main_chain,
            block_infos,
        }
    }

    /// The canonical entry of this level, if one is marked.
    pub fn main_chain_block(&self) -> Option<&BlockInfo> {
        if self.has_block_on_main_chain {
            self.block_infos.first()
        } else {
            None
        }
    }

    pub fn find_index(&self, block_hash: &H256) -> Option<usize> {
        self.block_infos
            .iter()
            .position(|info| info.block_hash == *block_hash)
    }

    pub fn find(&self, block_hash: &H256) -> Option<&BlockInfo> {
        self.find_index(block_hash).map(|index| &self.block_infos[index])
    }

    pub fn contains(&self, block_hash: &H256) -> bool {
        self.find_index(block_hash).is_some()
    }

    /// Adds an entry without changing which block is canonical.
    ///
    /// With `first` the entry goes to index 0, ahead of every other entry, unless the level
    /// already has a canonical block; otherwise it is appended.
    pub fn insert(&mut self, block_info: BlockInfo, first: bool) {
        if first && !self.has_block_on_main_chain {
            self.block_infos.insert(0, block_info);
        } else {
            self.block_infos.push(block_info);
        }
    }

    /// Removes the entry with the given hash, returning whether it was present.
    pub fn remove(&mut self, block_hash: &H256) -> bool {
        let before = self.block_infos.len();
        self.block_infos.retain(|info| info.block_hash != *block_hash);
        before != self.block_infos.len()
    }
}

#[cfg(test)]
mod tests {
    use ssz::{Decode, Encode};

    use super::*;

    fn hash(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    #[test]
    fn main_chain_block_requires_flag() {
        let mut level = ChainLevelInfo::new(false, vec![BlockInfo::new(hash(1), U256::from(1))]);
        assert!(level.main_chain_block().is_none());
        level.has_block_on_main_chain = true;
        assert_eq!(level.main_chain_block().unwrap().block_hash, hash(1));
    }

    #[test]
    fn insert_first_keeps_the_others_in_order() {
        let mut level = ChainLevelInfo::new(
            false,
            vec![
                BlockInfo::new(hash(1), U256::from(1)),
                BlockInfo::new(hash(2), U256::from(2)),
            ],
        );
        level.insert(BlockInfo::new(hash(3), U256::from(3)), true);

        let order: Vec<_> = level.block_infos.iter().map(|i| i.block_hash).collect();
        assert_eq!(order, vec![hash(3), hash(1), hash(2)]);
        assert!(!level.has_block_on_main_chain);
    }

    #[test]
    fn insert_first_never_displaces_the_canonical_block() {
        let mut level = ChainLevelInfo::new(true, vec![BlockInfo::new(hash(1), U256::from(1))]);
        level.insert(BlockInfo::new(hash(2), U256::from(9)), true);
        assert_eq!(level.main_chain_block().unwrap().block_hash, hash(1));
        assert_eq!(level.find_index(&hash(2)), Some(1));
    }

    #[test]
    fn insert_appends_without_touching_canonical_flag() {
        let mut level = ChainLevelInfo::new(true, vec![BlockInfo::new(hash(1), U256::from(1))]);
        level.insert(BlockInfo::new(hash(2), U256::from(5)), false);
        assert_eq!(level.main_chain_block().unwrap().block_hash, hash(1));
        assert_eq!(level.find_index(&hash(2)), Some(1));
    }

    #[test]
    fn level_encoding_is_deterministic() {
        let mut info = BlockInfo::new(hash(9), U256::from(12));
        info.was_processed = true;
        let level = ChainLevelInfo::new(true, vec![info, BlockInfo::new(hash(8), U256::from(8))]);
        let bytes = level.as_ssz_bytes();
        let decoded = ChainLevelInfo::from_ssz_bytes(&bytes).unwrap();
        assert_eq!(decoded, level);
        assert_eq!(decoded.as_ssz_bytes(), bytes);
    }
}
