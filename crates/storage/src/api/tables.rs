/// Tables in the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Block header storage: H256 -> BlockHeader
    BlockHeaders,
    /// Full block storage: H256 -> Block
    ///
    /// The reserved 8-byte key `0` holds the lowest inserted body number.
    BlockBodies,
    /// Chain levels and tree pointers.
    ///
    /// Keys are either a block number (8 bytes, big endian) -> ChainLevelInfo, or one
    /// of the 32-byte singleton keys for the head hash and the delete pointer.
    BlockInfos,
    /// Transaction receipts: (block hash || index as u32 BE) -> Receipt
    Receipts,
    /// World state snapshots: state root -> StateSnapshot
    States,
}

/// All table variants.
pub const ALL_TABLES: [Table; 5] = [
    Table::BlockHeaders,
    Table::BlockBodies,
    Table::BlockInfos,
    Table::Receipts,
    Table::States,
];
