use std::rc::Rc;

use alloy_primitives::{Address, Bytes};
use auto_impl::auto_impl;
use tracing::{debug, trace, warn};

use crate::{
    constants::{
        gas,
        precompiles::{METERING_INJECTOR, TRANSCOMPILER},
        sandbox::TRANSCOMPILE_SUCCESS,
    },
    sandbox::is_wasm_code,
    Call, CallResult, CallScope, Environment, Interface, KernelConfig, KernelError, Precompiles,
    Sandbox, SandboxOutcome, State, WasmiSandbox,
};

/// Dispatches a call and reports its effects.
///
/// This is the seam through which running code issues nested calls: every
/// [`Environment`] carries a handle to the dispatcher its calls go to.
#[auto_impl(&, Box, Rc, Arc)]
pub trait CallHandler {
    /// Runs `call` against `state` and returns its result. Faults never escape: they are
    /// reported as a failed [`CallResult`] and every state change of the call is reverted.
    fn call_handler(&self, call: &Call, state: &mut State, scope: CallScope) -> CallResult;
}

/// The kernel: resolves calls to precompiles or code, builds their execution contexts and runs
/// the code in the [`Sandbox`].
///
/// A kernel is a cheap handle; cloning it shares the configuration, the precompiles and the
/// sandbox.
#[derive(Clone, Debug)]
pub struct Kernel {
    inner: Rc<KernelInner>,
}

#[derive(derive_more::Debug)]
struct KernelInner {
    config: KernelConfig,
    precompiles: Precompiles,
    #[debug(skip)]
    sandbox: Box<dyn Sandbox>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

impl Kernel {
    /// Creates a kernel running code in a [`WasmiSandbox`].
    pub fn new(config: KernelConfig) -> Self {
        Self::with_sandbox(config, WasmiSandbox::new())
    }

    /// Creates a kernel running code in `sandbox`.
    pub fn with_sandbox(config: KernelConfig, sandbox: impl Sandbox + 'static) -> Self {
        let precompiles = if config.metering == Default::default() {
            Precompiles::standard().clone()
        } else {
            Precompiles::with_metering(config.metering)
        };
        Self::with_parts(config, precompiles, sandbox)
    }

    /// Creates a kernel from its parts.
    pub fn with_parts(
        config: KernelConfig,
        precompiles: Precompiles,
        sandbox: impl Sandbox + 'static,
    ) -> Self {
        Self { inner: Rc::new(KernelInner { config, precompiles, sandbox: Box::new(sandbox) }) }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    /// Returns the precompiles.
    pub fn precompiles(&self) -> &Precompiles {
        &self.inner.precompiles
    }

    /// Runs a top-level call, started by `call.from`.
    pub fn execute(&self, call: &Call, state: &mut State) -> CallResult {
        self.call_handler(call, state, CallScope::top_level(call.from))
    }

    /// Runs native `code` in the sandbox, bound to `interface`.
    pub fn code_handler(&self, code: &[u8], interface: Interface) -> SandboxOutcome {
        let address = interface.address();
        trace!(target: "ewasm::kernel", %address, len = code.len(), "Running code");
        self.inner.sandbox.execute(code, interface)
    }

    fn dispatch(
        &self,
        call: &Call,
        state: &mut State,
        scope: CallScope,
    ) -> Result<CallResult, KernelError> {
        let limit = self.inner.config.max_call_depth;
        if scope.depth > limit {
            return Err(KernelError::CallDepthExceeded { depth: scope.depth, limit });
        }

        if let Some(precompile) = self.inner.precompiles.get(&call.to) {
            debug!(target: "ewasm::kernel", to = %call.to, "Running precompile");
            state.transfer(call.from, call.to, call.value)?;
            let output = precompile.run(call, state)?;
            return Ok(CallResult::success(call.gas_limit, output));
        }

        if call.is_deployment() {
            return self.deploy(call, state, scope);
        }

        if !state.contains_account(&call.to) {
            return Err(KernelError::AccountNotFound(call.to));
        }
        state.transfer(call.from, call.to, call.value)?;

        let code =
            state.account_code(&call.to).cloned().ok_or(KernelError::ContractNotFound(call.to))?;
        let code = self.native_code(call.to, code, state, scope)?;

        let environment = Environment::new(call, scope, Rc::new(self.clone()));
        let interface = Interface::new(environment, core::mem::take(state));
        let SandboxOutcome { interface, result } = self.code_handler(&code, interface);
        let (environment, returned) = interface.into_parts();
        *state = returned;
        result?;

        if let Some(beneficiary) = environment.self_destruct {
            debug!(target: "ewasm::kernel", address = %call.to, %beneficiary, "Self-destructed");
            state.settle_self_destruct(call.to, beneficiary);
        }
        Ok(CallResult::from_environment(environment))
    }

    /// Returns `code` as WebAssembly, transcompiling legacy bytecode through the transcompiler
    /// precompile. Substitution happens at most once.
    fn native_code(
        &self,
        address: Address,
        code: Bytes,
        state: &mut State,
        scope: CallScope,
    ) -> Result<Bytes, KernelError> {
        if is_wasm_code(&code) {
            return Ok(code);
        }
        if !self.inner.config.transcompile_legacy_code {
            return Err(KernelError::UnsupportedCodeFormat(address));
        }

        debug!(target: "ewasm::kernel", %address, len = code.len(), "Transcompiling legacy code");
        let call = Call::new(Address::ZERO, TRANSCOMPILER, 0).with_data(code);
        let result = self.call_handler(&call, state, scope);
        if let Some(error) = result.error() {
            return Err(KernelError::TranscompilationFailed(error.to_string()));
        }

        let output = result.return_value;
        match output.first() {
            Some(&TRANSCOMPILE_SUCCESS) if is_wasm_code(&output[1..]) => Ok(output.slice(1..)),
            Some(&TRANSCOMPILE_SUCCESS) => Err(KernelError::UnsupportedCodeFormat(address)),
            Some(_) => Err(KernelError::TranscompilationFailed(
                String::from_utf8_lossy(&output[1..]).into_owned(),
            )),
            None => Err(KernelError::TranscompilationFailed("empty output".to_string())),
        }
    }

    /// Deploys `call.data` as a new account derived from the creator and its nonce. The code is
    /// stored, not run.
    fn deploy(
        &self,
        call: &Call,
        state: &mut State,
        scope: CallScope,
    ) -> Result<CallResult, KernelError> {
        let nonce = state.bump_nonce(call.from);
        let address = call.from.create(nonce);

        let code = if self.inner.config.meter_deployed_code && is_wasm_code(&call.data) {
            let injection =
                Call::new(Address::ZERO, METERING_INJECTOR, 0).with_data(call.data.clone());
            let result = self.call_handler(&injection, state, scope);
            if let Some(error) = result.error() {
                return Err(error.clone());
            }
            result.return_value
        } else {
            call.data.clone()
        };

        let cost = gas::CODEDEPOSIT.saturating_mul(code.len() as u64);
        let gas_left = call
            .gas_limit
            .checked_sub(cost)
            .ok_or(KernelError::OutOfGas { requested: cost, available: call.gas_limit })?;

        if !call.value.is_zero() {
            state.debit(call.from, call.value)?;
        }
        state.deploy(address, code, call.value)?;

        debug!(target: "ewasm::kernel", creator = %call.from, %address, "Deployed contract");
        Ok(CallResult::success(gas_left, Bytes::copy_from_slice(address.as_slice())))
    }
}

impl CallHandler for Kernel {
    fn call_handler(&self, call: &Call, state: &mut State, scope: CallScope) -> CallResult {
        let checkpoint = state.checkpoint();
        match self.dispatch(call, state, scope) {
            Ok(result) => {
                state.commit(checkpoint);
                result
            }
            Err(error) => {
                warn!(
                    target: "ewasm::kernel",
                    from = %call.from,
                    to = %call.to,
                    depth = scope.depth,
                    %error,
                    "Call failed"
                );
                state.revert(checkpoint);
                CallResult::failure(error)
            }
        }
    }
}

/// Runs a top-level call with a default [`Kernel`].
pub fn call_handler(call: &Call, state: &mut State) -> CallResult {
    Kernel::default().execute(call, state)
}
