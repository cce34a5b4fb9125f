use alloy_primitives::{keccak256, map::HashMap, Address, Bytes, B256, U256};
use revm::primitives::KECCAK_EMPTY;
use serde::{Deserialize, Serialize};

use crate::KernelError;

/// An account of the kernel state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    /// The balance of the account.
    pub balance: U256,
    /// The hash of the account's code, [`KECCAK_EMPTY`] when the account has none.
    pub code_hash: B256,
    /// The number of accounts this account has deployed.
    pub nonce: u64,
}

impl Default for Account {
    fn default() -> Self {
        Self { balance: U256::ZERO, code_hash: KECCAK_EMPTY, nonce: 0 }
    }
}

impl Account {
    /// Creates an account without code holding `balance`.
    pub fn with_balance(balance: U256) -> Self {
        Self { balance, ..Default::default() }
    }

    /// Whether the account references a code blob.
    pub fn has_code(&self) -> bool {
        self.code_hash != KECCAK_EMPTY
    }
}

/// A position in the state journal. Reverting to it undoes every change made after it was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Checkpoint(usize);

#[derive(Clone, Debug, PartialEq, Eq)]
enum JournalEntry {
    /// The account had the given value (or did not exist) before it was changed.
    Account { address: Address, previous: Option<Account> },
    /// A code blob was stored for the first time.
    Code { hash: B256 },
}

/// The world state the kernel operates on: accounts keyed by address and code blobs keyed by
/// their keccak-256 hash.
///
/// Mutations made while a [`Checkpoint`] is open are recorded in a journal so that a failed call
/// can be rolled back to where it started. Checkpoints nest: the journal is discarded once the
/// outermost one is closed, and changes made outside any checkpoint are permanent right away.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct State {
    accounts: HashMap<Address, Account>,
    code: HashMap<B256, Bytes>,
    #[serde(skip)]
    journal: Vec<JournalEntry>,
    #[serde(skip)]
    open_checkpoints: usize,
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.accounts == other.accounts && self.code == other.code
    }
}

impl Eq for State {}

impl State {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the account at `address`.
    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    /// Whether an account exists at `address`.
    pub fn contains_account(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    /// Returns the balance of the account at `address`.
    pub fn balance(&self, address: &Address) -> Option<U256> {
        self.account(address).map(|account| account.balance)
    }

    /// Iterates over all accounts.
    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.accounts.iter()
    }

    /// Returns the code blob stored under `hash`.
    pub fn code(&self, hash: &B256) -> Option<&Bytes> {
        self.code.get(hash)
    }

    /// Returns the code of the account at `address`, if it has any.
    pub fn account_code(&self, address: &Address) -> Option<&Bytes> {
        self.account(address)
            .filter(|account| account.has_code())
            .and_then(|account| self.code(&account.code_hash))
    }

    /// Inserts or replaces the account at `address`.
    pub fn insert_account(&mut self, address: Address, account: Account) {
        let previous = self.accounts.insert(address, account);
        self.record(JournalEntry::Account { address, previous });
    }

    /// Removes the account at `address`, returning it. Its code blob stays stored.
    pub fn remove_account(&mut self, address: &Address) -> Option<Account> {
        let previous = self.accounts.remove(address);
        if previous.is_some() {
            self.record(JournalEntry::Account { address: *address, previous });
        }
        previous
    }

    /// Stores a code blob and returns its hash. Storing the same blob twice is a no-op.
    pub fn insert_code(&mut self, code: Bytes) -> B256 {
        let hash = keccak256(&code);
        if !self.code.contains_key(&hash) {
            self.code.insert(hash, code);
            self.record(JournalEntry::Code { hash });
        }
        hash
    }

    /// Applies `f` to the account at `address`, creating an empty account first when absent.
    fn modify_account(&mut self, address: Address, f: impl FnOnce(&mut Account)) {
        let previous = self.accounts.get(&address).copied();
        let account = self.accounts.entry(address).or_default();
        f(account);
        self.record(JournalEntry::Account { address, previous });
    }

    /// Adds `amount` to the balance of `address`, creating the account when absent.
    pub fn credit(&mut self, address: Address, amount: U256) {
        self.modify_account(address, |account| {
            account.balance = account.balance.saturating_add(amount);
        });
    }

    /// Subtracts `amount` from the balance of `address`.
    pub fn debit(&mut self, address: Address, amount: U256) -> Result<(), KernelError> {
        let balance = self.balance(&address).unwrap_or_default();
        if balance < amount {
            return Err(KernelError::InsufficientBalance { address, balance, required: amount });
        }
        self.modify_account(address, |account| account.balance = balance - amount);
        Ok(())
    }

    /// Moves `value` from `from` to `to`, creating the recipient when absent. A zero value leaves
    /// both accounts untouched.
    pub fn transfer(&mut self, from: Address, to: Address, value: U256) -> Result<(), KernelError> {
        if value.is_zero() {
            return Ok(());
        }
        self.debit(from, value)?;
        self.credit(to, value);
        Ok(())
    }

    /// Increments the nonce of the account at `address`, if it exists, and returns the nonce it
    /// had before.
    pub fn bump_nonce(&mut self, address: Address) -> u64 {
        let Some(nonce) = self.account(&address).map(|account| account.nonce) else {
            return 0;
        };
        self.modify_account(address, |account| account.nonce = nonce.saturating_add(1));
        nonce
    }

    /// Creates a new account at `address` that runs `code` and holds `balance`.
    pub fn deploy(
        &mut self,
        address: Address,
        code: Bytes,
        balance: U256,
    ) -> Result<B256, KernelError> {
        if self.contains_account(&address) {
            return Err(KernelError::AccountCollision(address));
        }
        let code_hash = self.insert_code(code);
        self.insert_account(address, Account { balance, code_hash, nonce: 0 });
        Ok(code_hash)
    }

    /// Settles the self-destruct of `address`: its entire balance moves to `beneficiary` and the
    /// account is removed. A self-destruct that names itself as beneficiary burns the balance.
    pub fn settle_self_destruct(&mut self, address: Address, beneficiary: Address) {
        let Some(account) = self.remove_account(&address) else {
            return;
        };
        if beneficiary != address {
            self.credit(beneficiary, account.balance);
        }
    }

    fn record(&mut self, entry: JournalEntry) {
        if self.open_checkpoints > 0 {
            self.journal.push(entry);
        }
    }

    /// Opens a checkpoint. Every checkpoint must be closed by [`State::commit`] or
    /// [`State::revert`], innermost first.
    pub fn checkpoint(&mut self) -> Checkpoint {
        self.open_checkpoints += 1;
        Checkpoint(self.journal.len())
    }

    /// Number of checkpoints opened and not yet closed.
    pub const fn open_checkpoints(&self) -> usize {
        self.open_checkpoints
    }

    /// Number of journaled changes that can still be reverted.
    pub fn pending_changes(&self) -> usize {
        self.journal.len()
    }

    /// Undoes every change made after `checkpoint` and closes it.
    pub fn revert(&mut self, checkpoint: Checkpoint) {
        while self.journal.len() > checkpoint.0 {
            let Some(entry) = self.journal.pop() else { break };
            match entry {
                JournalEntry::Account { address, previous: Some(account) } => {
                    self.accounts.insert(address, account);
                }
                JournalEntry::Account { address, previous: None } => {
                    self.accounts.remove(&address);
                }
                JournalEntry::Code { hash } => {
                    self.code.remove(&hash);
                }
            }
        }
        self.close_checkpoint();
    }

    /// Keeps every change made after `checkpoint` and closes it. The changes stay revertible
    /// through any enclosing checkpoint.
    pub fn commit(&mut self, checkpoint: Checkpoint) {
        debug_assert!(checkpoint.0 <= self.journal.len(), "checkpoint closed out of order");
        self.close_checkpoint();
    }

    fn close_checkpoint(&mut self) {
        self.open_checkpoints = self.open_checkpoints.saturating_sub(1);
        if self.open_checkpoints == 0 {
            self.journal.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const ALICE: Address = address!("0000000000000000000000000000000000a11ce0");
    const BOB: Address = address!("0000000000000000000000000000000000000b0b");

    #[test]
    fn test_transfer_moves_balance() {
        let mut state = State::new();
        state.insert_account(ALICE, Account::with_balance(U256::from(100)));
        state.transfer(ALICE, BOB, U256::from(40)).unwrap();
        assert_eq!(state.balance(&ALICE), Some(U256::from(60)));
        assert_eq!(state.balance(&BOB), Some(U256::from(40)));
    }

    #[test]
    fn test_transfer_insufficient_balance() {
        let mut state = State::new();
        state.insert_account(ALICE, Account::with_balance(U256::from(10)));
        let err = state.transfer(ALICE, BOB, U256::from(11)).unwrap_err();
        assert!(matches!(err, KernelError::InsufficientBalance { .. }));
        assert!(!state.contains_account(&BOB));
    }

    #[test]
    fn test_zero_transfer_does_not_touch_accounts() {
        let mut state = State::new();
        state.transfer(ALICE, BOB, U256::ZERO).unwrap();
        assert!(!state.contains_account(&ALICE));
        assert!(!state.contains_account(&BOB));
    }

    #[test]
    fn test_revert_restores_accounts_and_code() {
        let mut state = State::new();
        state.insert_account(ALICE, Account::with_balance(U256::from(5)));
        let checkpoint = state.checkpoint();

        state.transfer(ALICE, BOB, U256::from(5)).unwrap();
        let contract = address!("00000000000000000000000000000000000000cc");
        let hash = state.deploy(contract, Bytes::from_static(b"code"), U256::ZERO).unwrap();
        state.settle_self_destruct(ALICE, BOB);
        assert!(state.code(&hash).is_some());

        state.revert(checkpoint);
        assert_eq!(state.balance(&ALICE), Some(U256::from(5)));
        assert!(!state.contains_account(&BOB));
        assert!(state.code(&hash).is_none());
    }

    #[test]
    fn test_nested_revert_keeps_outer_changes() {
        let mut state = State::new();
        let outer = state.checkpoint();
        state.credit(ALICE, U256::from(1));
        let inner = state.checkpoint();
        state.credit(BOB, U256::from(2));
        state.revert(inner);
        state.commit(outer);
        assert_eq!(state.balance(&ALICE), Some(U256::from(1)));
        assert!(!state.contains_account(&BOB));
        assert_eq!(state.open_checkpoints(), 0);
        assert_eq!(state.pending_changes(), 0);
    }

    #[test]
    fn test_committed_inner_changes_revert_with_outer() {
        let mut state = State::new();
        state.insert_account(ALICE, Account::with_balance(U256::from(100)));
        let before = state.clone();

        let outer = state.checkpoint();
        let inner = state.checkpoint();
        assert_eq!(inner, outer, "nothing was written in between");
        state.transfer(ALICE, BOB, U256::from(7)).unwrap();
        state.commit(inner);
        assert_eq!(state.pending_changes(), 2);

        state.revert(outer);
        assert_eq!(state, before);
        assert_eq!(state.open_checkpoints(), 0);
    }

    #[test]
    fn test_changes_outside_checkpoints_are_not_journaled() {
        let mut state = State::new();
        state.insert_account(ALICE, Account::with_balance(U256::from(3)));
        state.credit(BOB, U256::from(1));
        state.insert_code(Bytes::from_static(b"code"));
        assert_eq!(state.pending_changes(), 0);

        let checkpoint = state.checkpoint();
        state.revert(checkpoint);
        assert_eq!(state.balance(&ALICE), Some(U256::from(3)));
        assert_eq!(state.balance(&BOB), Some(U256::from(1)));
    }

    #[test]
    fn test_equality_ignores_journal() {
        let mut journaled = State::new();
        let checkpoint = journaled.checkpoint();
        journaled.credit(ALICE, U256::from(1));

        let mut plain = State::new();
        plain.credit(ALICE, U256::from(1));
        assert_eq!(journaled, plain);
        journaled.commit(checkpoint);
    }

    #[test]
    fn test_deploy_collision() {
        let mut state = State::new();
        state.insert_account(ALICE, Account::default());
        let err = state.deploy(ALICE, Bytes::from_static(b"x"), U256::ZERO).unwrap_err();
        assert_eq!(err, KernelError::AccountCollision(ALICE));
    }

    #[test]
    fn test_self_destruct_to_itself_burns_balance() {
        let mut state = State::new();
        state.insert_account(ALICE, Account::with_balance(U256::from(9)));
        state.settle_self_destruct(ALICE, ALICE);
        assert!(!state.contains_account(&ALICE));
    }

    #[test]
    fn test_bump_nonce() {
        let mut state = State::new();
        assert_eq!(state.bump_nonce(ALICE), 0);
        assert!(!state.contains_account(&ALICE));
        state.insert_account(ALICE, Account::default());
        assert_eq!(state.bump_nonce(ALICE), 0);
        assert_eq!(state.bump_nonce(ALICE), 1);
        assert_eq!(state.account(&ALICE).unwrap().nonce, 2);
    }
}
