use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ethtree_storage::{ChainStore, ChainWriteBatch};
use ethtree_types::{
    ShortRoot,
    primitives::{Address, H256, U256},
    state::{self, Account, StateSnapshot},
};
use tracing::{debug, trace};

use crate::StateError;

/// Root of the state holding no accounts.
pub fn empty_state_root() -> H256 {
    state::snapshot(&BTreeMap::new())
        .map(|snapshot| state::state_root(&snapshot))
        .unwrap_or_default()
}

/// Account state with explicit checkpoints.
///
/// Mutations go to an in-memory working set. [`WorldState::commit_tree`] seals the working
/// set under a new state root, making it the base for later reads, without touching
/// storage. [`WorldState::commit_to_storage`] persists every sealed root at once, and
/// [`WorldState::restore`] throws away everything sealed or pending since a durable root.
pub struct WorldState {
    store: Arc<ChainStore>,
    state_root: H256,
    accounts: BTreeMap<Address, Account>,
    dirty: bool,
    /// Snapshots sealed by `commit_tree` and not yet persisted, by root.
    staged: HashMap<H256, StateSnapshot>,
}

impl std::fmt::Debug for WorldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldState")
            .field("state_root", &self.state_root)
            .field("accounts", &self.accounts)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl WorldState {
    /// An empty state over the given store.
    pub fn new(store: Arc<ChainStore>) -> Self {
        Self {
            store,
            state_root: empty_state_root(),
            accounts: BTreeMap::new(),
            dirty: false,
            staged: HashMap::new(),
        }
    }

    /// Opens the durable state with the given root.
    pub fn at_root(store: Arc<ChainStore>, root: H256) -> Result<Self, StateError> {
        let mut state = Self::new(store);
        state.reset_to(root)?;
        Ok(state)
    }

    pub fn state_root(&self) -> H256 {
        self.state_root
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        self.dirty
    }

    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn account_exists(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn balance(&self, address: &Address) -> U256 {
        self.accounts
            .get(address)
            .map(|account| account.balance)
            .unwrap_or_default()
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.accounts
            .get(address)
            .map(|account| account.nonce)
            .unwrap_or_default()
    }

    pub fn set_account(&mut self, address: Address, account: Account) {
        self.accounts.insert(address, account);
        self.dirty = true;
    }

    /// Credits `amount`, creating the account if it does not exist.
    pub fn add_to_balance(&mut self, address: Address, amount: U256) {
        let account = self.accounts.entry(address).or_default();
        account.balance = account.balance.saturating_add(amount);
        self.dirty = true;
    }

    pub fn subtract_from_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        let balance = self.balance(&address);
        let remaining = balance
            .checked_sub(amount)
            .ok_or(StateError::InsufficientBalance {
                address,
                balance,
                required: amount,
            })?;
        self.accounts.entry(address).or_default().balance = remaining;
        self.dirty = true;
        Ok(())
    }

    pub fn increment_nonce(&mut self, address: Address) {
        self.accounts.entry(address).or_default().nonce += 1;
        self.dirty = true;
    }

    /// Seals pending changes under a new state root and returns it.
    ///
    /// The result stays in memory until [`WorldState::commit_to_storage`].
    pub fn commit_tree(&mut self) -> Result<H256, StateError> {
        let snapshot = state::snapshot(&self.accounts).ok_or(StateError::SnapshotTooLarge)?;
        let root = state::state_root(&snapshot);
        trace!(root = %ShortRoot(&root.0), accounts = self.accounts.len(), "Sealed state");
        self.staged.insert(root, snapshot);
        self.state_root = root;
        self.dirty = false;
        Ok(root)
    }

    /// Persists every sealed state atomically.
    pub fn commit_to_storage(&mut self) -> Result<(), StateError> {
        let store = Arc::clone(&self.store);
        let mut batch = store.write()?;
        self.stage_into(&mut batch)?;
        batch.commit()?;
        Ok(())
    }

    /// Adds every sealed state to `batch` and forgets them.
    ///
    /// Lets callers persist state together with other data in one atomic batch. If the
    /// batch is dropped instead of committed, the sealed states are lost and the state
    /// must be restored.
    pub fn stage_into(&mut self, batch: &mut ChainWriteBatch<'_>) -> Result<(), StateError> {
        for (root, snapshot) in self.staged.drain() {
            batch.put_state(&root, &snapshot)?;
        }
        Ok(())
    }

    /// Returns to the durable state with the given root, discarding everything sealed or
    /// pending.
    pub fn restore(&mut self, root: H256) -> Result<(), StateError> {
        debug!(root = %ShortRoot(&root.0), "Restoring state");
        self.reset_to(root)
    }

    /// Drops all in-memory state and loads the durable state with the given root.
    pub fn reset_to(&mut self, root: H256) -> Result<(), StateError> {
        let accounts = if let Some(snapshot) = self.staged.get(&root) {
            collect_accounts(snapshot)
        } else if root == empty_state_root() {
            BTreeMap::new()
        } else {
            let snapshot = self
                .store
                .state(&root)?
                .ok_or(StateError::UnknownStateRoot(root))?;
            collect_accounts(&snapshot)
        };
        self.accounts = accounts;
        self.staged.clear();
        self.state_root = root;
        self.dirty = false;
        Ok(())
    }
}

fn collect_accounts(snapshot: &StateSnapshot) -> BTreeMap<Address, Account> {
    snapshot
        .iter()
        .map(|entry| (entry.address, entry.account.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use ethtree_storage::backend::InMemoryBackend;

    use super::*;

    fn store() -> Arc<ChainStore> {
        Arc::new(ChainStore::new(Arc::new(InMemoryBackend::new()), 8))
    }

    #[test]
    fn commit_tree_changes_root_without_persisting() {
        let store = store();
        let mut state = WorldState::new(store.clone());
        let before = state.state_root();

        state.add_to_balance(Address::repeat_byte(1), U256::from(100));
        assert!(state.has_uncommitted_changes());
        let root = state.commit_tree().unwrap();

        assert_ne!(root, before);
        assert!(!state.has_uncommitted_changes());
        assert!(!store.has_state(&root).unwrap());

        state.commit_to_storage().unwrap();
        assert!(store.has_state(&root).unwrap());
    }

    #[test]
    fn restore_discards_sealed_and_pending_changes() {
        let store = store();
        let alice = Address::repeat_byte(1);
        let mut state = WorldState::new(store.clone());
        state.add_to_balance(alice, U256::from(100));
        let checkpoint = state.commit_tree().unwrap();
        state.commit_to_storage().unwrap();

        state.subtract_from_balance(alice, U256::from(40)).unwrap();
        let sealed = state.commit_tree().unwrap();
        state.increment_nonce(alice);

        state.restore(checkpoint).unwrap();
        assert_eq!(state.state_root(), checkpoint);
        assert_eq!(state.balance(&alice), U256::from(100));
        assert_eq!(state.nonce(&alice), 0);
        assert!(!store.has_state(&sealed).unwrap());
    }

    #[test]
    fn reopening_at_root_loads_accounts() {
        let store = store();
        let bob = Address::repeat_byte(2);
        let mut state = WorldState::new(store.clone());
        state.add_to_balance(bob, U256::from(7));
        state.increment_nonce(bob);
        let root = state.commit_tree().unwrap();
        state.commit_to_storage().unwrap();

        let reopened = WorldState::at_root(store, root).unwrap();
        assert_eq!(reopened.balance(&bob), U256::from(7));
        assert_eq!(reopened.nonce(&bob), 1);
    }

    #[test]
    fn unknown_root_is_rejected() {
        let err = WorldState::at_root(store(), H256::repeat_byte(9)).unwrap_err();
        assert!(matches!(err, StateError::UnknownStateRoot(_)));
    }

    #[test]
    fn overdraft_is_rejected() {
        let mut state = WorldState::new(store());
        let err = state
            .subtract_from_balance(Address::repeat_byte(3), U256::from(1))
            .unwrap_err();
        assert!(matches!(err, StateError::InsufficientBalance { .. }));
        assert!(!state.has_uncommitted_changes());
    }
}
