use alloy_primitives::{Address, Bytes, U256};

use crate::{Account, State};

/// An in-memory [`State`] builder for testing purposes.
#[derive(Debug, Default, Clone, derive_more::Deref, derive_more::DerefMut)]
pub struct MemoryState {
    #[deref]
    #[deref_mut]
    state: State,
}

impl MemoryState {
    /// Creates a new `MemoryState` from a `State`.
    pub fn from_state(state: State) -> Self {
        Self { state }
    }

    /// Consumes the builder and returns the state.
    pub fn into_state(self) -> State {
        self.state
    }

    fn update_account(&mut self, address: Address, f: impl FnOnce(&mut Account)) {
        let mut account = self.state.account(&address).copied().unwrap_or_default();
        f(&mut account);
        self.state.insert_account(address, account);
    }

    /// Sets the code for an account in the state.
    pub fn set_account_code(&mut self, address: Address, code: Bytes) {
        let code_hash = self.state.insert_code(code);
        self.update_account(address, |account| account.code_hash = code_hash);
    }

    /// Sets the code for an account in the state.
    pub fn account_code(mut self, address: Address, code: impl Into<Bytes>) -> Self {
        self.set_account_code(address, code.into());
        self
    }

    /// Sets the balance for an account in the state.
    pub fn set_account_balance(&mut self, address: Address, balance: U256) {
        self.update_account(address, |account| account.balance = balance);
    }

    /// Sets the balance for an account in the state.
    pub fn account_balance(mut self, address: Address, balance: U256) -> Self {
        self.set_account_balance(address, balance);
        self
    }

    /// Sets the nonce for an account in the state.
    pub fn set_account_nonce(&mut self, address: Address, nonce: u64) {
        self.update_account(address, |account| account.nonce = nonce);
    }

    /// Sets the nonce for an account in the state.
    pub fn account_nonce(mut self, address: Address, nonce: u64) -> Self {
        self.set_account_nonce(address, nonce);
        self
    }
}

impl From<MemoryState> for State {
    fn from(state: MemoryState) -> Self {
        state.into_state()
    }
}
