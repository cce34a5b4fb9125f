use std::rc::Rc;

use alloy_primitives::{Address, Bytes, U256};

use crate::{Call, CallHandler, CallScope, KernelError, Log};

/// The execution context of one call: the mutable state of a single invocation, owned by the
/// frame running it and discarded once its [`CallResult`](crate::CallResult) is produced.
#[derive(Clone, derive_more::Debug)]
pub struct Environment {
    /// The account whose code is running.
    pub address: Address,
    /// The external actor that started the call chain.
    pub origin: Address,
    /// The immediate sender of this call.
    pub caller: Address,
    /// The call data.
    pub call_data: Bytes,
    /// The value transferred with this call.
    pub call_value: U256,
    /// The remaining gas.
    pub gas_left: u64,
    /// The accumulated gas refund.
    pub gas_refund: u64,
    /// The output of the call, set at most once.
    pub return_value: Option<Bytes>,
    /// The logs emitted by this call and its successful children.
    pub logs: Vec<Log>,
    /// The beneficiary of a self-destruct, set at most once.
    pub self_destruct: Option<Address>,
    /// The nesting depth of this call.
    pub depth: usize,
    /// The dispatcher nested calls are sent to.
    #[debug(skip)]
    pub call_handler: Rc<dyn CallHandler>,
}

impl Environment {
    /// Creates the execution context of `call`, dispatching nested calls to `call_handler`.
    pub fn new(call: &Call, scope: CallScope, call_handler: Rc<dyn CallHandler>) -> Self {
        Self {
            address: call.to,
            origin: scope.origin,
            caller: call.from,
            call_data: call.data.clone(),
            call_value: call.value,
            gas_left: call.gas_limit,
            gas_refund: 0,
            return_value: None,
            logs: Vec::new(),
            self_destruct: None,
            depth: scope.depth,
            call_handler,
        }
    }

    /// The scope of this call.
    pub const fn scope(&self) -> CallScope {
        CallScope { origin: self.origin, depth: self.depth }
    }

    /// Consumes `amount` gas. The counter is left unchanged when it does not cover `amount`.
    pub fn use_gas(&mut self, amount: u64) -> Result<(), KernelError> {
        self.gas_left = self
            .gas_left
            .checked_sub(amount)
            .ok_or(KernelError::OutOfGas { requested: amount, available: self.gas_left })?;
        Ok(())
    }

    /// Returns unused gas of a child call and accumulates its refund.
    pub fn reclaim_gas(&mut self, gas_left: u64, gas_refund: u64) {
        self.gas_left = self.gas_left.saturating_add(gas_left);
        self.gas_refund = self.gas_refund.saturating_add(gas_refund);
    }

    /// Sets the return value. It can be set only once.
    pub fn set_return_value(&mut self, value: Bytes) -> Result<(), KernelError> {
        if self.return_value.is_some() {
            return Err(KernelError::ReturnValueAlreadySet);
        }
        self.return_value = Some(value);
        Ok(())
    }

    /// Marks the call as self-destructed in favor of `beneficiary`. It can be set only once.
    pub fn set_self_destruct(&mut self, beneficiary: Address) -> Result<(), KernelError> {
        if self.self_destruct.is_some() {
            return Err(KernelError::AlreadySelfDestructed);
        }
        self.self_destruct = Some(beneficiary);
        Ok(())
    }
}
