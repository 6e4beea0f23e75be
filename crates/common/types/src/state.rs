use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::typenum::U1048576;
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

use crate::primitives::{Address, H256, U256, VariableList};

/// Balance and replay counter of a single account.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Encode, Decode, TreeHash, Serialize, Deserialize,
)]
pub struct Account {
    #[serde(default)]
    pub nonce: u64,
    pub balance: U256,
}

impl Account {
    pub fn with_balance(balance: U256) -> Self {
        Self { nonce: 0, balance }
    }

    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero()
    }
}

/// An account together with its address, as stored in a state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, TreeHash)]
pub struct AccountEntry {
    pub address: Address,
    pub account: Account,
}

/// Every account of a state, sorted by address.
pub type StateSnapshot = VariableList<AccountEntry, U1048576>;

/// Builds the snapshot for the given accounts.
///
/// Returns `None` if there are more accounts than a snapshot can hold.
pub fn snapshot(accounts: &BTreeMap<Address, Account>) -> Option<StateSnapshot> {
    let entries = accounts
        .iter()
        .map(|(address, account)| AccountEntry {
            address: *address,
            account: account.clone(),
        })
        .collect();
    StateSnapshot::new(entries).ok()
}

/// Commitment to a set of accounts.
///
/// Two states hash to the same root iff they hold the same accounts.
pub fn state_root(snapshot: &StateSnapshot) -> H256 {
    snapshot.tree_hash_root()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_does_not_depend_on_insertion_order() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);

        let mut first = BTreeMap::new();
        first.insert(a, Account::with_balance(U256::from(10)));
        first.insert(b, Account::with_balance(U256::from(20)));

        let mut second = BTreeMap::new();
        second.insert(b, Account::with_balance(U256::from(20)));
        second.insert(a, Account::with_balance(U256::from(10)));

        assert_eq!(
            state_root(&snapshot(&first).unwrap()),
            state_root(&snapshot(&second).unwrap())
        );
    }

    #[test]
    fn root_changes_with_balance() {
        let a = Address::repeat_byte(1);
        let mut accounts = BTreeMap::new();
        accounts.insert(a, Account::with_balance(U256::from(10)));
        let before = state_root(&snapshot(&accounts).unwrap());
        accounts.get_mut(&a).unwrap().balance = U256::from(11);
        assert_ne!(before, state_root(&snapshot(&accounts).unwrap()));
    }
}
