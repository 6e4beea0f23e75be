use ssz_derive::{Decode, Encode};
use ssz_types::typenum::{U16, U32, U1048576};
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

use crate::primitives::{Address, ByteList, H256, U256, VariableList};

/// Arbitrary header payload, bounded like Ethereum's `extraData`.
pub type ExtraData = ByteList<U32>;

/// Calldata carried by a transaction.
pub type TxData = ByteList<U1048576>;

/// Transactions included in a block body.
pub type Transactions = VariableList<Transaction, U1048576>;

/// Ommer (uncle) headers included in a block body.
pub type Ommers = VariableList<BlockHeader, U16>;

/// The header of a block, containing metadata.
///
/// The header identity is the tree hash root of every encoded field. The accumulated
/// weight (`total_difficulty`) is not part of the encoding nor of the identity: it is
/// resolved lazily by the block tree and cached on the in-memory copy only.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, TreeHash)]
pub struct BlockHeader {
    /// The hash of the parent block
    pub parent_hash: H256,
    /// The root of the ommer headers included in the body
    pub ommers_hash: H256,
    /// The account credited with the block rewards
    pub beneficiary: Address,
    /// The root of the state after applying transactions in this block
    pub state_root: H256,
    /// The root of the transactions included in the body
    pub transactions_root: H256,
    /// The root of the receipts produced by executing the body
    pub receipts_root: H256,
    /// The weight this block contributes to its branch
    pub difficulty: U256,
    /// The height of the block
    pub number: u64,
    /// Upper bound of gas all transactions may spend
    pub gas_limit: u64,
    /// Gas spent by all transactions
    pub gas_used: u64,
    /// Seconds since the unix epoch
    pub timestamp: u64,
    /// Free-form data chosen by the block author
    pub extra_data: ExtraData,
    /// Sum of the difficulty of this block and all of its ancestors.
    ///
    /// `None` until computed.
    #[ssz(skip_serializing, skip_deserializing)]
    #[tree_hash(skip_hashing)]
    pub total_difficulty: Option<U256>,
}

impl BlockHeader {
    /// Content hash identifying this header.
    pub fn hash(&self) -> H256 {
        self.tree_hash_root()
    }

    pub fn is_genesis(&self) -> bool {
        self.number == 0
    }
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            parent_hash: H256::ZERO,
            ommers_hash: Ommers::default().tree_hash_root(),
            beneficiary: Address::ZERO,
            state_root: H256::ZERO,
            transactions_root: Transactions::default().tree_hash_root(),
            receipts_root: H256::ZERO,
            difficulty: U256::ZERO,
            number: 0,
            gas_limit: 0,
            gas_used: 0,
            timestamp: 0,
            extra_data: ExtraData::default(),
            total_difficulty: None,
        }
    }
}

/// A value transfer between two accounts.
///
/// Signatures are verified before transactions reach the block tree, so the sender is
/// carried explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, TreeHash)]
pub struct Transaction {
    pub nonce: u64,
    pub sender: Address,
    pub to: Address,
    pub value: U256,
    pub gas_limit: u64,
    pub data: TxData,
}

impl Transaction {
    pub fn hash(&self) -> H256 {
        self.tree_hash_root()
    }
}

/// The body of a block, containing payload data.
#[derive(Debug, Default, Clone, PartialEq, Eq, Encode, Decode, TreeHash)]
pub struct BlockBody {
    /// Transactions, in execution order.
    pub transactions: Transactions,
    /// Ommer headers, only populated by consensus families that reward them.
    pub ommers: Ommers,
}

/// A complete block including header and body.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl Block {
    pub fn new(header: BlockHeader, body: BlockBody) -> Self {
        Self { header, body }
    }

    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> H256 {
        self.header.parent_hash
    }

    pub fn total_difficulty(&self) -> Option<U256> {
        self.header.total_difficulty
    }

    pub fn is_genesis(&self) -> bool {
        self.header.is_genesis()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.body.transactions
    }

    pub fn ommers(&self) -> &[BlockHeader] {
        &self.body.ommers
    }
}

#[cfg(test)]
mod tests {
    use ssz::{Decode, Encode};

    use super::*;

    fn header(number: u64) -> BlockHeader {
        BlockHeader {
            number,
            difficulty: U256::from(7),
            gas_limit: 30_000_000,
            timestamp: 1_700_000_000 + number,
            ..Default::default()
        }
    }

    #[test]
    fn total_difficulty_does_not_change_identity() {
        let mut h = header(3);
        let before = h.hash();
        h.total_difficulty = Some(U256::from(1_000));
        assert_eq!(h.hash(), before);
    }

    #[test]
    fn reencoding_yields_identical_bytes() {
        let mut h = header(9);
        h.total_difficulty = Some(U256::from(42));
        let bytes = h.as_ssz_bytes();
        let decoded = BlockHeader::from_ssz_bytes(&bytes).unwrap();
        assert_eq!(decoded.total_difficulty, None);
        assert_eq!(decoded.as_ssz_bytes(), bytes);
        assert_eq!(decoded.hash(), h.hash());
    }

    #[test]
    fn different_content_yields_different_hash() {
        let a = header(1);
        let mut b = header(1);
        b.difficulty = U256::from(8);
        assert_ne!(a.hash(), b.hash());
    }
}
