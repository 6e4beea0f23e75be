use ethtree_types::{
    block::Block,
    primitives::{Address, U256},
};

/// Why an account is credited at the end of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardKind {
    Block,
    Ommer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReward {
    pub address: Address,
    pub value: U256,
    pub kind: RewardKind,
}

/// Computes the rewards credited after a block's transactions.
pub trait RewardCalculator: Send + Sync {
    fn calculate_rewards(&self, block: &Block) -> Vec<BlockReward>;
}

/// No rewards at all, for chains without issuance.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBlockRewards;

impl RewardCalculator for NoBlockRewards {
    fn calculate_rewards(&self, _block: &Block) -> Vec<BlockReward> {
        Vec::new()
    }
}

/// A fixed block reward with the classic ommer schedule.
///
/// The beneficiary gets `block_reward` plus `block_reward / 32` per included ommer. Each
/// ommer beneficiary gets `block_reward * (8 + ommer.number - block.number) / 8`, which is
/// nothing for ommers eight or more blocks behind.
#[derive(Debug, Clone, Copy)]
pub struct StaticRewardCalculator {
    pub block_reward: U256,
}

impl StaticRewardCalculator {
    pub fn new(block_reward: U256) -> Self {
        Self { block_reward }
    }
}

impl RewardCalculator for StaticRewardCalculator {
    fn calculate_rewards(&self, block: &Block) -> Vec<BlockReward> {
        let ommers = block.ommers();
        let inclusion_bonus = (self.block_reward / U256::from(32)) * U256::from(ommers.len());
        let mut rewards = vec![BlockReward {
            address: block.header.beneficiary,
            value: self.block_reward.saturating_add(inclusion_bonus),
            kind: RewardKind::Block,
        }];

        for ommer in ommers {
            let distance = block.number().saturating_sub(ommer.number);
            if distance >= 8 {
                continue;
            }
            rewards.push(BlockReward {
                address: ommer.beneficiary,
                value: self.block_reward * U256::from(8 - distance) / U256::from(8),
                kind: RewardKind::Ommer,
            });
        }
        rewards
    }
}

#[cfg(test)]
mod tests {
    use ethtree_types::block::{BlockBody, BlockHeader, Ommers};

    use super::*;

    fn block_with_ommers(number: u64, ommer_numbers: &[u64]) -> Block {
        let ommers = ommer_numbers
            .iter()
            .enumerate()
            .map(|(i, n)| BlockHeader {
                number: *n,
                beneficiary: Address::repeat_byte(i as u8 + 10),
                ..Default::default()
            })
            .collect();
        Block::new(
            BlockHeader {
                number,
                beneficiary: Address::repeat_byte(1),
                ..Default::default()
            },
            BlockBody {
                ommers: Ommers::new(ommers).unwrap(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn static_rewards_follow_ommer_schedule() {
        let calculator = StaticRewardCalculator::new(U256::from(3200));
        let rewards = calculator.calculate_rewards(&block_with_ommers(10, &[9, 2]));

        assert_eq!(rewards.len(), 2);
        assert_eq!(rewards[0].address, Address::repeat_byte(1));
        assert_eq!(rewards[0].value, U256::from(3200 + 2 * 100));
        assert_eq!(rewards[1].kind, RewardKind::Ommer);
        assert_eq!(rewards[1].value, U256::from(3200 * 7 / 8));
    }

    #[test]
    fn no_rewards_is_empty() {
        assert!(NoBlockRewards.calculate_rewards(&block_with_ommers(1, &[])).is_empty());
    }
}
