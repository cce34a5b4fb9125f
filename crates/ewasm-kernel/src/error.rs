use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::Transaction;

/// Faults that end a single call. The kernel never lets one escape to the caller as an `Err`:
/// `call_handler` turns every fault into a [`CallOutcome::Failure`](crate::CallOutcome::Failure),
/// consuming all gas of the call and reverting its state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum KernelError {
    /// The callee has no account.
    #[error("Account not found: {0}")]
    AccountNotFound(Address),
    /// The callee account exists but has no code stored for its code hash.
    #[error("Contract not found: {0}")]
    ContractNotFound(Address),
    /// The code is neither WebAssembly nor transcompilable legacy bytecode.
    #[error("Unsupported code format at {0}")]
    UnsupportedCodeFormat(Address),
    /// The transcompiler rejected the legacy bytecode.
    #[error("Transcompilation failed: {0}")]
    TranscompilationFailed(String),
    /// The call ran out of gas.
    #[error("Out of gas: requested={requested} > available={available}")]
    OutOfGas {
        /// The amount of gas the operation needed
        requested: u64,
        /// The gas left in the execution context
        available: u64,
    },
    /// The sender cannot cover the transferred value.
    #[error("Insufficient balance of {address}: balance={balance} < required={required}")]
    InsufficientBalance {
        /// The account being debited
        address: Address,
        /// The current balance of the account
        balance: U256,
        /// The amount to debit
        required: U256,
    },
    /// The call is nested deeper than the configured limit.
    #[error("Call depth exceeded: depth={depth} > limit={limit}")]
    CallDepthExceeded {
        /// The depth of the rejected call
        depth: usize,
        /// The configured maximum depth
        limit: usize,
    },
    /// A deployment targets an address that already has an account.
    #[error("Account collision at {0}")]
    AccountCollision(Address),
    /// The code attempted to set its return value twice.
    #[error("Return value already set")]
    ReturnValueAlreadySet,
    /// The code attempted to self-destruct twice.
    #[error("Already self-destructed")]
    AlreadySelfDestructed,
    /// A log was emitted with an invalid number of topics.
    #[error("Invalid log: {topics} topics > limit={limit}")]
    InvalidLog {
        /// The number of topics requested
        topics: usize,
        /// The maximum number of topics
        limit: usize,
    },
    /// The code passed a memory range outside its linear memory.
    #[error("Memory access out of bounds: offset={offset}, length={length}")]
    MemoryAccess {
        /// The start of the range
        offset: u64,
        /// The length of the range
        length: u64,
    },
    /// The metering injector rejected the module.
    #[error("Metering failed: {0}")]
    MeteringFailed(String),
    /// The sandbox failed to instantiate the module, or the module trapped.
    #[error("Sandbox error: {0}")]
    Sandbox(String),
}

impl KernelError {
    /// Creates a [`KernelError::Sandbox`] from any displayable error.
    pub fn sandbox(error: impl core::fmt::Display) -> Self {
        Self::Sandbox(error.to_string())
    }
}

/// Reasons a transaction is rejected before it is dispatched. A rejected transaction leaves the
/// state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum TransactionError {
    /// The sender has no account.
    #[error("Sender not found: {0}")]
    SenderNotFound(Address),
    /// The sender cannot pay for the gas it purchases.
    #[error("Insufficient balance of {sender}: balance={balance}, cost={cost:?}")]
    InsufficientBalance {
        /// The transaction sender
        sender: Address,
        /// The balance of the sender
        balance: U256,
        /// The cost of the purchased gas, `None` when it overflows
        cost: Option<U256>,
    },
    /// The external validator rejected the transaction.
    #[error("Invalid transaction: {0}")]
    Validation(String),
}

impl TransactionError {
    /// Creates a [`TransactionError::InsufficientBalance`] for the sender of `tx`.
    pub fn insufficient_balance(tx: &Transaction, balance: U256) -> Self {
        Self::InsufficientBalance { sender: tx.from, balance, cost: tx.gas_cost() }
    }
}
