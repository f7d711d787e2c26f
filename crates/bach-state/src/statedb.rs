//! Journaled in-memory state database

use crate::account::Account;
use crate::error::{StateError, StateResult};
use crate::snapshot::{SnapshotTree, StateDiff};
use crate::trie::secure_trie_root;
use bach_crypto::{keccak256, Address, H256, U256};
use rlp::RlpStream;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Log entry emitted during execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    /// Emitting contract
    pub address: Address,
    /// Indexed topics (0 to 4)
    pub topics: Vec<H256>,
    /// Non-indexed payload
    pub data: Vec<u8>,
}

/// Undo record for one state mutation
#[derive(Debug, Clone)]
enum JournalEntry {
    Create { address: Address },
    Reset { address: Address, prev: Box<Account> },
    Touch { address: Address },
    Balance { address: Address, prev: U256 },
    Nonce { address: Address, prev: u64 },
    Storage { address: Address, slot: H256, prev: U256 },
    Code { address: Address, prev_code: Arc<Vec<u8>>, prev_hash: H256 },
    Log,
    Refund { prev: u64 },
}

impl JournalEntry {
    fn address(&self) -> Option<Address> {
        match self {
            Self::Create { address }
            | Self::Reset { address, .. }
            | Self::Touch { address }
            | Self::Balance { address, .. }
            | Self::Nonce { address, .. }
            | Self::Storage { address, .. }
            | Self::Code { address, .. } => Some(*address),
            Self::Log | Self::Refund { .. } => None,
        }
    }
}

/// Account database with nested snapshot/revert.
///
/// Every mutation is journaled until the next `finalise`. Snapshot ids are
/// positions in that journal and become invalid once finalised.
#[derive(Debug, Clone)]
pub struct StateDb {
    accounts: HashMap<Address, Account>,
    journal: Vec<JournalEntry>,
    /// (revision id, journal length) pairs, ids strictly increasing
    revisions: Vec<(usize, usize)>,
    next_revision: usize,
    /// Accounts mutated since the last commit
    pending: BTreeSet<Address>,
    /// Storage slots written since the last commit
    pending_slots: BTreeMap<Address, BTreeSet<H256>>,
    /// Accounts deleted since the last commit
    destructed: BTreeSet<Address>,
    logs: Vec<Log>,
    refund: u64,
    committed_root: H256,
}

impl Default for StateDb {
    fn default() -> Self {
        Self::from_accounts(std::iter::empty())
    }
}

impl StateDb {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state holding `accounts` as already-committed content
    pub fn from_accounts(accounts: impl IntoIterator<Item = (Address, Account)>) -> Self {
        let mut state = Self {
            accounts: accounts.into_iter().collect(),
            journal: Vec::new(),
            revisions: Vec::new(),
            next_revision: 0,
            pending: BTreeSet::new(),
            pending_slots: BTreeMap::new(),
            destructed: BTreeSet::new(),
            logs: Vec::new(),
            refund: 0,
            committed_root: H256::zero(),
        };
        state.committed_root = state.state_root();
        state
    }

    // ==================== Reads ====================

    /// Whether the account exists (possibly empty)
    pub fn exist(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    /// Whether the account is missing or EIP-161 empty
    pub fn empty(&self, address: &Address) -> bool {
        self.accounts.get(address).map_or(true, Account::is_empty)
    }

    /// Borrow an account
    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    /// Iterate over all live accounts
    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.accounts.iter()
    }

    /// Balance, zero for missing accounts
    pub fn balance(&self, address: &Address) -> U256 {
        self.accounts
            .get(address)
            .map(|a| a.balance)
            .unwrap_or_default()
    }

    /// Nonce, zero for missing accounts
    pub fn nonce(&self, address: &Address) -> u64 {
        self.accounts.get(address).map(|a| a.nonce).unwrap_or(0)
    }

    /// Code, empty for missing accounts
    pub fn code(&self, address: &Address) -> Arc<Vec<u8>> {
        self.accounts
            .get(address)
            .map(|a| Arc::clone(&a.code))
            .unwrap_or_default()
    }

    /// Code hash; the zero hash for missing accounts
    pub fn code_hash(&self, address: &Address) -> H256 {
        self.accounts
            .get(address)
            .map(|a| a.code_hash)
            .unwrap_or_else(H256::zero)
    }

    /// Storage slot value, zero when unset
    pub fn storage(&self, address: &Address, slot: &H256) -> U256 {
        self.accounts
            .get(address)
            .and_then(|a| a.storage.get(slot).copied())
            .unwrap_or_default()
    }

    /// Accumulated gas refund of the current transaction
    pub fn refund(&self) -> u64 {
        self.refund
    }

    /// Logs emitted since the state was created
    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    /// keccak256(rlp(logs)), compared against the `logs` field of test vectors
    pub fn logs_hash(&self) -> H256 {
        let mut stream = RlpStream::new_list(self.logs.len());
        for log in &self.logs {
            stream.begin_list(3);
            stream.append(&log.address);
            stream.append_list::<H256, H256>(&log.topics);
            stream.append(&log.data);
        }
        keccak256(&stream.out())
    }

    // ==================== Writes ====================

    fn account_mut(&mut self, address: Address) -> &mut Account {
        if !self.accounts.contains_key(&address) {
            self.journal.push(JournalEntry::Create { address });
        }
        self.accounts.entry(address).or_default()
    }

    /// Mark an account as touched, creating it if missing
    pub fn touch(&mut self, address: Address) {
        self.account_mut(address);
        self.journal.push(JournalEntry::Touch { address });
    }

    /// Create a fresh account at `address`, carrying over any existing balance
    pub fn create_account(&mut self, address: Address) {
        let balance = match self.accounts.get(&address) {
            Some(prev) => {
                let balance = prev.balance;
                let prev = Box::new(prev.clone());
                self.journal.push(JournalEntry::Reset { address, prev });
                balance
            }
            None => {
                self.journal.push(JournalEntry::Create { address });
                U256::zero()
            }
        };
        self.accounts.insert(
            address,
            Account {
                balance,
                ..Account::default()
            },
        );
    }

    /// Credit an account; a zero amount still touches it
    pub fn add_balance(&mut self, address: Address, amount: U256) {
        let account = self.account_mut(address);
        let prev = account.balance;
        account.balance = prev.saturating_add(amount);
        self.journal.push(JournalEntry::Balance { address, prev });
    }

    /// Debit an account
    pub fn sub_balance(&mut self, address: Address, amount: U256) -> StateResult<()> {
        if self.balance(&address) < amount {
            return Err(StateError::InsufficientBalance { address });
        }
        let account = self.account_mut(address);
        let prev = account.balance;
        account.balance = prev - amount;
        self.journal.push(JournalEntry::Balance { address, prev });
        Ok(())
    }

    /// Set the nonce
    pub fn set_nonce(&mut self, address: Address, nonce: u64) {
        let account = self.account_mut(address);
        let prev = account.nonce;
        account.nonce = nonce;
        self.journal.push(JournalEntry::Nonce { address, prev });
    }

    /// Replace the code
    pub fn set_code(&mut self, address: Address, code: Vec<u8>) {
        let fresh = Account::new(0, U256::zero(), code);
        let account = self.account_mut(address);
        let prev_code = std::mem::replace(&mut account.code, fresh.code);
        let prev_hash = std::mem::replace(&mut account.code_hash, fresh.code_hash);
        self.journal.push(JournalEntry::Code {
            address,
            prev_code,
            prev_hash,
        });
    }

    /// Write a storage slot; zero deletes it
    pub fn set_storage(&mut self, address: Address, slot: H256, value: U256) {
        let account = self.account_mut(address);
        let prev = if value.is_zero() {
            account.storage.remove(&slot)
        } else {
            account.storage.insert(slot, value)
        };
        let prev = prev.unwrap_or_default();
        self.journal.push(JournalEntry::Storage {
            address,
            slot,
            prev,
        });
        self.pending_slots.entry(address).or_default().insert(slot);
    }

    /// Append a log
    pub fn add_log(&mut self, log: Log) {
        self.logs.push(log);
        self.journal.push(JournalEntry::Log);
    }

    /// Increase the gas refund counter
    pub fn add_refund(&mut self, gas: u64) {
        self.journal.push(JournalEntry::Refund { prev: self.refund });
        self.refund = self.refund.saturating_add(gas);
    }

    /// Decrease the gas refund counter
    pub fn sub_refund(&mut self, gas: u64) {
        self.journal.push(JournalEntry::Refund { prev: self.refund });
        self.refund = self.refund.saturating_sub(gas);
    }

    // ==================== Snapshots ====================

    /// Open a revision that `revert_to_snapshot` can roll back to
    pub fn snapshot(&mut self) -> usize {
        let id = self.next_revision;
        self.next_revision += 1;
        self.revisions.push((id, self.journal.len()));
        id
    }

    /// Undo every mutation made since `snapshot` returned `id`
    pub fn revert_to_snapshot(&mut self, id: usize) -> StateResult<()> {
        let idx = self
            .revisions
            .binary_search_by_key(&id, |(rev, _)| *rev)
            .map_err(|_| StateError::InvalidRevision(id))?;
        let journal_len = self.revisions[idx].1;
        self.revisions.truncate(idx);

        while self.journal.len() > journal_len {
            if let Some(entry) = self.journal.pop() {
                self.undo(entry);
            }
        }
        Ok(())
    }

    fn undo(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Create { address } => {
                self.accounts.remove(&address);
            }
            JournalEntry::Reset { address, prev } => {
                self.accounts.insert(address, *prev);
            }
            JournalEntry::Touch { .. } => {}
            JournalEntry::Balance { address, prev } => {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.balance = prev;
                }
            }
            JournalEntry::Nonce { address, prev } => {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.nonce = prev;
                }
            }
            JournalEntry::Storage {
                address,
                slot,
                prev,
            } => {
                if let Some(account) = self.accounts.get_mut(&address) {
                    if prev.is_zero() {
                        account.storage.remove(&slot);
                    } else {
                        account.storage.insert(slot, prev);
                    }
                }
            }
            JournalEntry::Code {
                address,
                prev_code,
                prev_hash,
            } => {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.code = prev_code;
                    account.code_hash = prev_hash;
                }
            }
            JournalEntry::Log => {
                self.logs.pop();
            }
            JournalEntry::Refund { prev } => self.refund = prev,
        }
    }

    // ==================== Commitment ====================

    /// Close the journal. With `delete_empty` (EIP-158), touched empty
    /// accounts are removed.
    pub fn finalise(&mut self, delete_empty: bool) {
        let dirty: BTreeSet<Address> = self.journal.iter().filter_map(JournalEntry::address).collect();
        for address in dirty {
            let Some(account) = self.accounts.get(&address) else {
                continue;
            };
            if delete_empty && account.is_empty() {
                self.accounts.remove(&address);
                self.destructed.insert(address);
            } else {
                self.pending.insert(address);
            }
        }
        self.journal.clear();
        self.revisions.clear();
        self.refund = 0;
    }

    /// Finalise and return the resulting state root
    pub fn intermediate_root(&mut self, delete_empty: bool) -> H256 {
        self.finalise(delete_empty);
        self.state_root()
    }

    /// Root of the current account set without closing the journal
    pub fn state_root(&self) -> H256 {
        secure_trie_root(
            self.accounts
                .iter()
                .map(|(address, account)| (address.as_bytes().to_vec(), account.rlp_bytes())),
        )
    }

    /// Root of the last commit
    pub fn committed_root(&self) -> H256 {
        self.committed_root
    }

    /// Finalise, then push the accumulated diff as a new layer onto `snaps`
    /// (when given). Returns the new root.
    pub fn commit(&mut self, delete_empty: bool, snaps: Option<&mut SnapshotTree>) -> H256 {
        let root = self.intermediate_root(delete_empty);
        let diff = self.take_diff();
        if let Some(snaps) = snaps {
            let parent = self.committed_root;
            if parent != root {
                if let Err(err) = snaps.update(root, parent, diff) {
                    tracing::warn!(?root, ?parent, %err, "Failed to update snapshot tree");
                }
            }
        }
        self.committed_root = root;
        root
    }

    fn take_diff(&mut self) -> StateDiff {
        let mut diff = StateDiff::default();
        for address in std::mem::take(&mut self.destructed) {
            if !self.accounts.contains_key(&address) {
                diff.destructs.insert(keccak256(address.as_bytes()));
            }
        }
        let mut slots = std::mem::take(&mut self.pending_slots);
        for address in std::mem::take(&mut self.pending) {
            let Some(account) = self.accounts.get(&address) else {
                continue;
            };
            let account_hash = keccak256(address.as_bytes());
            diff.accounts.insert(account_hash, account.slim_rlp_bytes());
            if let Some(written) = slots.remove(&address) {
                let storage = written
                    .into_iter()
                    .map(|slot| {
                        let value = account
                            .storage
                            .get(&slot)
                            .map(|v| rlp::encode(v).to_vec())
                            .unwrap_or_default();
                        (keccak256(slot.as_bytes()), value)
                    })
                    .collect();
                diff.storage.insert(account_hash, storage);
            }
        }
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bach_crypto::{EMPTY_LIST_HASH, EMPTY_ROOT_HASH};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn test_empty_state_root() {
        let state = StateDb::new();
        assert_eq!(state.state_root(), EMPTY_ROOT_HASH);
        assert_eq!(state.committed_root(), EMPTY_ROOT_HASH);
        assert_eq!(state.logs_hash(), EMPTY_LIST_HASH);
    }

    #[test]
    fn test_revert_restores_root() {
        let mut state = StateDb::from_accounts([(addr(1), Account::new(0, U256::from(100), vec![]))]);
        let before = state.state_root();

        let snap = state.snapshot();
        state.add_balance(addr(2), U256::from(5));
        state.set_storage(addr(1), H256::repeat_byte(9), U256::from(7));
        state.set_nonce(addr(1), 3);
        assert_ne!(state.state_root(), before);

        state.revert_to_snapshot(snap).unwrap();
        assert_eq!(state.state_root(), before);
        assert!(!state.exist(&addr(2)));
    }

    #[test]
    fn test_nested_snapshots() {
        let mut state = StateDb::new();
        let outer = state.snapshot();
        state.add_balance(addr(1), U256::from(1));
        let inner = state.snapshot();
        state.add_balance(addr(1), U256::from(1));
        state.revert_to_snapshot(inner).unwrap();
        assert_eq!(state.balance(&addr(1)), U256::from(1));
        state.revert_to_snapshot(outer).unwrap();
        assert!(!state.exist(&addr(1)));
    }

    #[test]
    fn test_revert_unknown_revision() {
        let mut state = StateDb::new();
        assert_eq!(state.revert_to_snapshot(4), Err(StateError::InvalidRevision(4)));
        let id = state.snapshot();
        state.revert_to_snapshot(id).unwrap();
        assert_eq!(state.revert_to_snapshot(id), Err(StateError::InvalidRevision(id)));
    }

    #[test]
    fn test_touched_empty_account_deleted() {
        let mut state = StateDb::new();
        state.add_balance(addr(3), U256::zero());
        assert!(state.exist(&addr(3)));

        let mut legacy = state.clone();
        assert_eq!(state.intermediate_root(true), EMPTY_ROOT_HASH);
        assert!(!state.exist(&addr(3)));

        assert_ne!(legacy.intermediate_root(false), EMPTY_ROOT_HASH);
    }

    #[test]
    fn test_sub_balance_insufficient() {
        let mut state = StateDb::new();
        let err = state.sub_balance(addr(1), U256::one()).unwrap_err();
        assert_eq!(err, StateError::InsufficientBalance { address: addr(1) });
    }

    #[test]
    fn test_log_reverted() {
        let mut state = StateDb::new();
        let snap = state.snapshot();
        state.add_log(Log {
            address: addr(1),
            topics: vec![H256::zero()],
            data: vec![1, 2],
        });
        assert_ne!(state.logs_hash(), EMPTY_LIST_HASH);
        state.revert_to_snapshot(snap).unwrap();
        assert!(state.logs().is_empty());
    }
}
