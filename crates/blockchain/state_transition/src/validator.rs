use ethtree_types::{ShortRoot, block::Block, receipt::Receipt};
use tracing::error;

/// Checks an executed block against the block that was suggested.
pub trait BlockValidator: Send + Sync {
    fn validate_processed_block(
        &self,
        processed: &Block,
        receipts: &[Receipt],
        suggested: &Block,
    ) -> bool;
}

/// Accepts an executed block only if it hashes to the suggested block.
///
/// Every header field derived from execution is part of the hash, so any disagreement in
/// state root, receipts root or gas usage is caught. The first differing field is logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessedBlockValidator;

impl BlockValidator for ProcessedBlockValidator {
    fn validate_processed_block(
        &self,
        processed: &Block,
        receipts: &[Receipt],
        suggested: &Block,
    ) -> bool {
        if processed.hash() == suggested.hash() {
            return true;
        }

        let (p, s) = (&processed.header, &suggested.header);
        let hash = suggested.hash();
        let number = s.number;
        if p.gas_used != s.gas_used {
            error!(number, hash = %ShortRoot(&hash.0), processed = p.gas_used, suggested = s.gas_used, receipts = receipts.len(), "Gas used mismatch");
        } else if p.receipts_root != s.receipts_root {
            error!(number, hash = %ShortRoot(&hash.0), processed = %p.receipts_root, suggested = %s.receipts_root, "Receipts root mismatch");
        } else if p.state_root != s.state_root {
            error!(number, hash = %ShortRoot(&hash.0), processed = %p.state_root, suggested = %s.state_root, "State root mismatch");
        } else {
            error!(number, hash = %ShortRoot(&hash.0), processed = %processed.hash(), "Processed block hash mismatch");
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use ethtree_types::{
        block::{BlockBody, BlockHeader},
        primitives::H256,
    };

    use super::*;

    #[test]
    fn identical_blocks_are_valid() {
        let block = Block::new(BlockHeader::default(), BlockBody::default());
        assert!(ProcessedBlockValidator.validate_processed_block(&block, &[], &block));
    }

    #[test]
    fn differing_state_root_is_invalid() {
        let suggested = Block::new(BlockHeader::default(), BlockBody::default());
        let mut processed = suggested.clone();
        processed.header.state_root = H256::repeat_byte(1);
        assert!(!ProcessedBlockValidator.validate_processed_block(&processed, &[], &suggested));
    }
}
