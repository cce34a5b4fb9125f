use alloy_primitives::{Address, Bytes, B256, U256};
use delegate::delegate;
use tracing::trace;

use crate::{
    constants::{gas, limits::MAX_LOG_TOPICS},
    Call, CallScope, Environment, KernelError, Log, State,
};

/// The capability interface: the only channel between sandboxed code and the kernel.
///
/// An interface is bound to the [`Environment`] of one call and holds the [`State`] while that
/// call runs, so exactly one frame can mutate the state at a time. Nested calls borrow the state
/// for their duration and hand it back when they complete.
#[derive(Debug)]
pub struct Interface {
    environment: Environment,
    state: State,
    /// The return value of the last child call.
    return_data: Bytes,
    halted: bool,
}

impl Interface {
    /// Binds an interface to `environment`, taking ownership of `state` while the call runs.
    pub fn new(environment: Environment, state: State) -> Self {
        Self { environment, state, return_data: Bytes::new(), halted: false }
    }

    /// Releases the environment and the state.
    pub fn into_parts(self) -> (Environment, State) {
        (self.environment, self.state)
    }

    /// Returns the bound environment.
    pub const fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Returns the state.
    pub const fn state(&self) -> &State {
        &self.state
    }

    /// Whether the code halted through `finish` or `self_destruct`.
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    delegate! {
        to self.environment {
            /// Returns the scope of the running call.
            pub fn scope(&self) -> CallScope;
        }
    }

    /// Consumes `amount` gas, failing with [`KernelError::OutOfGas`] when not enough is left.
    pub fn use_gas(&mut self, amount: u64) -> Result<(), KernelError> {
        trace!(target: "ewasm::interface", amount, gas_left = self.environment.gas_left, "useGas");
        self.environment.use_gas(amount)
    }

    /// Returns the remaining gas.
    pub const fn gas_left(&self) -> u64 {
        self.environment.gas_left
    }

    /// Returns the address of the running account.
    pub const fn address(&self) -> Address {
        self.environment.address
    }

    /// Returns the immediate sender of the call.
    pub const fn caller(&self) -> Address {
        self.environment.caller
    }

    /// Returns the external actor that started the call chain.
    pub const fn origin(&self) -> Address {
        self.environment.origin
    }

    /// Returns the value transferred with the call.
    pub const fn call_value(&self) -> U256 {
        self.environment.call_value
    }

    /// Returns the call data.
    pub const fn call_data(&self) -> &Bytes {
        &self.environment.call_data
    }

    /// Returns the balance of `address`, zero when it has no account.
    pub fn balance(&self, address: &Address) -> U256 {
        self.state.balance(address).unwrap_or_default()
    }

    /// Returns the return value of the last child call.
    pub const fn return_data(&self) -> &Bytes {
        &self.return_data
    }

    /// Sends a nested call to `to` with `gas` forwarded from this call.
    ///
    /// The forwarded gas is charged up front. When the child succeeds, its unused gas and refund
    /// are credited back and its logs are appended to this call's logs. A failed child consumes
    /// all forwarded gas and leaves no trace in the state. Returns whether the child succeeded.
    pub fn call(
        &mut self,
        to: Address,
        gas: u64,
        value: U256,
        data: Bytes,
    ) -> Result<bool, KernelError> {
        self.environment.use_gas(gas)?;

        let call = Call { from: self.environment.address, to, gas_limit: gas, value, data };
        trace!(target: "ewasm::interface", ?call, depth = self.environment.depth, "call");
        let result = self.environment.call_handler.call_handler(
            &call,
            &mut self.state,
            self.environment.scope().nested(),
        );

        self.return_data = result.return_value;
        if !result.is_success() {
            return Ok(false);
        }
        self.environment.reclaim_gas(result.gas_left, result.gas_refund);
        self.environment.logs.extend(result.logs);
        Ok(true)
    }

    /// Deploys `code` as a new account funded with `value`, forwarding all remaining gas.
    /// Returns the address of the new account, or `None` when the deployment failed.
    pub fn create(&mut self, value: U256, code: Bytes) -> Result<Option<Address>, KernelError> {
        let gas = self.environment.gas_left;
        if !self.call(Address::ZERO, gas, value, code)? {
            return Ok(None);
        }
        Ok(Address::try_from(&self.return_data[..]).ok())
    }

    /// Sets the return value of the call and halts.
    pub fn finish(&mut self, value: Bytes) -> Result<(), KernelError> {
        trace!(target: "ewasm::interface", len = value.len(), "return");
        self.environment.set_return_value(value)?;
        self.halted = true;
        Ok(())
    }

    /// Emits a log with up to four topics.
    pub fn log(&mut self, topics: Vec<B256>, data: Bytes) -> Result<(), KernelError> {
        if topics.len() > MAX_LOG_TOPICS {
            return Err(KernelError::InvalidLog { topics: topics.len(), limit: MAX_LOG_TOPICS });
        }
        let cost = gas::LOG
            .saturating_add(gas::LOGTOPIC.saturating_mul(topics.len() as u64))
            .saturating_add(gas::LOGDATA.saturating_mul(data.len() as u64));
        self.use_gas(cost)?;

        trace!(target: "ewasm::interface", topics = topics.len(), len = data.len(), "log");
        self.environment.logs.push(Log { address: self.environment.address, topics, data });
        Ok(())
    }

    /// Marks the running account for destruction in favor of `beneficiary` and halts. The
    /// balance moves once the call completes.
    pub fn self_destruct(&mut self, beneficiary: Address) -> Result<(), KernelError> {
        trace!(target: "ewasm::interface", %beneficiary, "selfDestruct");
        self.environment.set_self_destruct(beneficiary)?;
        self.halted = true;
        Ok(())
    }
}
