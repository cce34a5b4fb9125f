use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::{Environment, KernelError};

/// A message-call request, either top-level (from a transaction) or nested (issued by running
/// code).
///
/// A call to the zero address with non-empty data is a deployment of `data` as new code.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// The immediate sender.
    pub from: Address,
    /// The callee, a precompile or an account with code.
    pub to: Address,
    /// The gas made available to the callee.
    pub gas_limit: u64,
    /// The value transferred from `from` to `to`.
    pub value: U256,
    /// The call data.
    pub data: Bytes,
}

impl Call {
    /// Creates a call without value or data.
    pub const fn new(from: Address, to: Address, gas_limit: u64) -> Self {
        Self { from, to, gas_limit, value: U256::ZERO, data: Bytes::new() }
    }

    /// Sets the transferred value.
    pub const fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    /// Sets the call data.
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    /// Whether the call deploys its data as new code.
    pub fn is_deployment(&self) -> bool {
        self.to.is_zero() && !self.data.is_empty()
    }
}

/// Where a call sits in its call chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallScope {
    /// The external actor that started the chain. Constant for the whole chain.
    pub origin: Address,
    /// Nesting depth; the top-level call runs at depth zero.
    pub depth: usize,
}

impl CallScope {
    /// The scope of a top-level call started by `origin`.
    pub const fn top_level(origin: Address) -> Self {
        Self { origin, depth: 0 }
    }

    /// The scope of a call nested one level below this one.
    pub const fn nested(self) -> Self {
        Self { origin: self.origin, depth: self.depth + 1 }
    }
}

/// A log entry emitted by running code.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Log {
    /// The account that emitted the log.
    pub address: Address,
    /// Up to four indexed topics.
    pub topics: Vec<B256>,
    /// The unindexed payload.
    pub data: Bytes,
}

/// Whether a call succeeded, and the fault that ended it otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOutcome {
    /// The call completed and its effects are applied.
    Success,
    /// The call faulted. All of its gas is consumed and none of its state changes survive.
    Failure(KernelError),
}

/// The result of one `call_handler` invocation, the only channel through which a call reports its
/// effects to its caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResult {
    /// Success, or the failure kind.
    pub outcome: CallOutcome,
    /// Unused gas, always zero for a failed call.
    pub gas_left: u64,
    /// Accumulated gas refund.
    pub gas_refund: u64,
    /// The output of the call.
    pub return_value: Bytes,
    /// The beneficiary of a self-destruct, already settled against the state.
    pub self_destruct: Option<Address>,
    /// Logs emitted by the call and its successful descendants, in order.
    pub logs: Vec<Log>,
}

impl CallResult {
    /// A successful result that spent no gas and produced `return_value`.
    pub fn success(gas_left: u64, return_value: Bytes) -> Self {
        Self {
            outcome: CallOutcome::Success,
            gas_left,
            gas_refund: 0,
            return_value,
            self_destruct: None,
            logs: Vec::new(),
        }
    }

    /// A failed result. A failure consumes all gas supplied to the call.
    pub fn failure(error: KernelError) -> Self {
        Self {
            outcome: CallOutcome::Failure(error),
            gas_left: 0,
            gas_refund: 0,
            return_value: Bytes::new(),
            self_destruct: None,
            logs: Vec::new(),
        }
    }

    /// Assembles the result of a completed execution context.
    pub(crate) fn from_environment(environment: Environment) -> Self {
        Self {
            outcome: CallOutcome::Success,
            gas_left: environment.gas_left,
            gas_refund: environment.gas_refund,
            return_value: environment.return_value.unwrap_or_default(),
            self_destruct: environment.self_destruct,
            logs: environment.logs,
        }
    }

    /// Whether the call succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, CallOutcome::Success)
    }

    /// The fault that ended the call, if any.
    pub const fn error(&self) -> Option<&KernelError> {
        match &self.outcome {
            CallOutcome::Success => None,
            CallOutcome::Failure(error) => Some(error),
        }
    }
}

/// An external transaction, already decoded and signature-recovered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The recovered sender.
    pub from: Address,
    /// The callee. The zero address deploys `data`.
    pub to: Address,
    /// The gas purchased by the sender.
    pub gas_limit: u64,
    /// The price paid per unit of gas.
    pub gas_price: U256,
    /// The value transferred to the callee.
    pub value: U256,
    /// The call data.
    pub data: Bytes,
    /// The sender nonce, checked by the external validator.
    pub nonce: u64,
}

impl Transaction {
    /// The up-front cost of the purchased gas, or `None` on overflow.
    pub fn gas_cost(&self) -> Option<U256> {
        U256::from(self.gas_limit).checked_mul(self.gas_price)
    }

    /// The call this transaction dispatches into the kernel.
    pub fn to_call(&self) -> Call {
        Call {
            from: self.from,
            to: self.to,
            gas_limit: self.gas_limit,
            value: self.value,
            data: self.data.clone(),
        }
    }
}

/// An ordered sequence of transactions applied against one evolving state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The transactions, in execution order.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Creates a block from its transactions.
    pub const fn new(transactions: Vec<Transaction>) -> Self {
        Self { transactions }
    }
}
