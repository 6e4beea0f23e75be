use ethtree_storage::StoreError;
use ethtree_types::{
    ShortRoot,
    block::BlockHeader,
    chain_level::{BlockInfo, ChainLevelInfo},
    primitives::{H256, U256},
};
use tracing::trace;

#[derive(Debug, thiserror::Error)]
pub enum ForkChoiceError {
    #[error("parent {parent} of block {child} is unknown")]
    MissingParent { child: H256, parent: H256 },
    #[error("total difficulty of block {0} overflows")]
    Overflow(H256),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Access to the block tree needed to resolve accumulated weights.
pub trait WeightSource {
    /// Looks up a header by hash.
    fn header(&self, hash: &H256) -> Result<Option<BlockHeader>, ForkChoiceError>;

    /// Total difficulty already recorded for `header` in its chain level, if any.
    fn recorded_total_difficulty(
        &self,
        header: &BlockHeader,
    ) -> Result<Option<U256>, ForkChoiceError>;

    /// Persists the total difficulty computed for an ancestor that had none recorded.
    fn record(&self, header: &BlockHeader, total_difficulty: U256) -> Result<(), ForkChoiceError>;
}

/// Resolves the accumulated weight of `header`.
///
/// Walks parent links iteratively, stacking every ancestor whose weight is unknown until it
/// reaches one with a known weight (or genesis), then unwinds the stack adding each
/// header's own difficulty. Every resolved ancestor is recorded through the source; the
/// weight of `header` itself is only returned.
pub fn compute_total_difficulty<S: WeightSource + ?Sized>(
    source: &S,
    header: &BlockHeader,
) -> Result<U256, ForkChoiceError> {
    if let Some(total_difficulty) = header.total_difficulty {
        return Ok(total_difficulty);
    }

    let mut pending = Vec::new();
    let mut current = header.clone();
    let mut total_difficulty = loop {
        if current.is_genesis() {
            pending.push(current);
            break U256::ZERO;
        }
        let parent_hash = current.parent_hash;
        let parent = source
            .header(&parent_hash)?
            .ok_or(ForkChoiceError::MissingParent {
                child: current.hash(),
                parent: parent_hash,
            })?;
        pending.push(current);

        let known = match parent.total_difficulty {
            Some(td) => Some(td),
            None => source.recorded_total_difficulty(&parent)?,
        };
        if let Some(td) = known {
            break td;
        }
        current = parent;
    };

    if pending.len() > 1 {
        trace!(
            hash = %ShortRoot(&header.hash().0),
            unresolved = pending.len() - 1,
            "Resolving total difficulty of unresolved ancestors"
        );
    }

    while let Some(next) = pending.pop() {
        total_difficulty = total_difficulty
            .checked_add(next.difficulty)
            .ok_or_else(|| ForkChoiceError::Overflow(next.hash()))?;
        if !pending.is_empty() {
            source.record(&next, total_difficulty)?;
        }
    }

    Ok(total_difficulty)
}

/// The effective block of a level.
///
/// This is the canonical entry when one is marked. Otherwise it is the entry with the highest
/// accumulated weight, with ties going to the first one seen.
pub fn best_block_info(level: &ChainLevelInfo) -> Option<&BlockInfo> {
    if let Some(main) = level.main_chain_block() {
        return Some(main);
    }
    level.block_infos.iter().fold(None, |best: Option<&BlockInfo>, info| match best {
        Some(best) if best.total_difficulty >= info.total_difficulty => Some(best),
        _ => Some(info),
    })
}

/// Whether a block of weight `candidate` should replace `current` as the best block.
pub fn is_heavier(candidate: U256, current: Option<U256>) -> bool {
    current.is_none_or(|current| candidate > current)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct MapSource {
        headers: HashMap<H256, BlockHeader>,
        recorded: RefCell<HashMap<H256, U256>>,
        lookups: RefCell<usize>,
    }

    impl MapSource {
        fn insert(&mut self, header: BlockHeader) -> BlockHeader {
            self.headers.insert(header.hash(), header.clone());
            header
        }
    }

    impl WeightSource for MapSource {
        fn header(&self, hash: &H256) -> Result<Option<BlockHeader>, ForkChoiceError> {
            *self.lookups.borrow_mut() += 1;
            Ok(self.headers.get(hash).cloned())
        }

        fn recorded_total_difficulty(
            &self,
            header: &BlockHeader,
        ) -> Result<Option<U256>, ForkChoiceError> {
            Ok(self.recorded.borrow().get(&header.hash()).copied())
        }

        fn record(&self, header: &BlockHeader, td: U256) -> Result<(), ForkChoiceError> {
            self.recorded.borrow_mut().insert(header.hash(), td);
            Ok(())
        }
    }

    fn child(parent: &BlockHeader, difficulty: u64) -> BlockHeader {
        BlockHeader {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            difficulty: U256::from(difficulty),
            ..Default::default()
        }
    }

    fn genesis(difficulty: u64) -> BlockHeader {
        BlockHeader {
            difficulty: U256::from(difficulty),
            ..Default::default()
        }
    }

    #[test]
    fn genesis_weight_is_its_own_difficulty() {
        let source = MapSource::default();
        let td = compute_total_difficulty(&source, &genesis(5)).unwrap();
        assert_eq!(td, U256::from(5));
        assert!(source.recorded.borrow().is_empty());
    }

    #[test]
    fn known_weight_short_circuits() {
        let source = MapSource::default();
        let mut header = child(&genesis(1), 3);
        header.total_difficulty = Some(U256::from(99));
        assert_eq!(compute_total_difficulty(&source, &header).unwrap(), U256::from(99));
        assert_eq!(*source.lookups.borrow(), 0);
    }

    #[test]
    fn weight_is_additive_over_long_unresolved_chains() {
        let mut source = MapSource::default();
        let g = source.insert(genesis(5));
        source.recorded.borrow_mut().insert(g.hash(), U256::from(5));

        let mut tip = g.clone();
        let mut chain = Vec::new();
        for _ in 0..10_000 {
            tip = source.insert(child(&tip, 2));
            chain.push(tip.clone());
        }

        let td = compute_total_difficulty(&source, &tip).unwrap();
        assert_eq!(td, U256::from(5 + 2 * 10_000));

        // Every ancestor got recorded, the tip itself did not.
        let recorded = source.recorded.borrow();
        assert_eq!(recorded.get(&chain[0].hash()), Some(&U256::from(7)));
        assert_eq!(recorded.get(&chain[9_998].hash()), Some(&U256::from(5 + 2 * 9_999)));
        assert!(!recorded.contains_key(&tip.hash()));
    }

    #[test]
    fn unrecorded_genesis_contributes_its_difficulty() {
        let mut source = MapSource::default();
        let g = source.insert(genesis(5));
        let a = source.insert(child(&g, 3));
        assert_eq!(compute_total_difficulty(&source, &a).unwrap(), U256::from(8));
        assert_eq!(source.recorded.borrow().get(&g.hash()), Some(&U256::from(5)));
    }

    #[test]
    fn missing_parent_is_reported() {
        let source = MapSource::default();
        let orphan = child(&genesis(1), 1);
        let err = compute_total_difficulty(&source, &orphan).unwrap_err();
        assert!(matches!(err, ForkChoiceError::MissingParent { .. }));
    }

    #[test]
    fn best_block_prefers_canonical_then_heaviest_then_first_seen() {
        let a = BlockInfo::new(H256::repeat_byte(1), U256::from(8));
        let b = BlockInfo::new(H256::repeat_byte(2), U256::from(12));
        let c = BlockInfo::new(H256::repeat_byte(3), U256::from(12));

        let level = ChainLevelInfo::new(false, vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(best_block_info(&level).unwrap().block_hash, b.block_hash);

        let level = ChainLevelInfo::new(true, vec![a.clone(), b, c]);
        assert_eq!(best_block_info(&level).unwrap().block_hash, a.block_hash);

        assert!(best_block_info(&ChainLevelInfo::default()).is_none());
    }

    #[test]
    fn heavier_requires_strictly_greater_weight() {
        assert!(is_heavier(U256::from(1), None));
        assert!(is_heavier(U256::from(12), Some(U256::from(8))));
        assert!(!is_heavier(U256::from(8), Some(U256::from(8))));
    }
}
