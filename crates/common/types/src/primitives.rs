use ssz_types::typenum::Unsigned;
use tree_hash::Hash256;

// Re-export SSZ traits to avoid users having to depend on these directly
pub use ssz::{Decode, DecodeError, Encode};
pub use tree_hash::TreeHash;

pub use alloy_primitives::{Address, U256};
pub use ssz_types::{VariableList, typenum};

pub type H256 = Hash256;

pub type ByteList<N: Unsigned> = ssz_types::VariableList<u8, N>;

/// Hash of a header list with no entries, used as the ommers hash of blocks without ommers.
pub fn empty_list_root() -> H256 {
    crate::block::Ommers::default().tree_hash_root()
}
