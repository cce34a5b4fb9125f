use serde::{Deserialize, Serialize};

use crate::constants::limits::DEFAULT_MAX_CALL_DEPTH;

/// Configuration of the [`Kernel`](crate::Kernel).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// The deepest nesting level a call may run at. The top-level call runs at depth zero.
    pub max_call_depth: usize,
    /// Whether legacy EVM bytecode is transcompiled into WebAssembly before execution. When off,
    /// legacy code fails with [`KernelError::UnsupportedCodeFormat`](crate::KernelError).
    pub transcompile_legacy_code: bool,
    /// Whether deployed WebAssembly code is instrumented with gas metering before it is stored.
    pub meter_deployed_code: bool,
    /// The cost rules of the metering injector.
    pub metering: MeteringConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            transcompile_legacy_code: true,
            meter_deployed_code: false,
            metering: MeteringConfig::default(),
        }
    }
}

impl KernelConfig {
    /// Sets the maximum call depth.
    pub const fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    /// Enables or disables transcompilation of legacy bytecode.
    pub const fn with_transcompile_legacy_code(mut self, enabled: bool) -> Self {
        self.transcompile_legacy_code = enabled;
        self
    }

    /// Enables or disables metering of deployed code.
    pub const fn with_meter_deployed_code(mut self, enabled: bool) -> Self {
        self.meter_deployed_code = enabled;
        self
    }

    /// Sets the metering cost rules.
    pub const fn with_metering(mut self, metering: MeteringConfig) -> Self {
        self.metering = metering;
        self
    }
}

/// Constant cost rules injected by the metering precompile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeteringConfig {
    /// Gas charged per WebAssembly instruction.
    pub instruction_cost: u32,
    /// Gas charged per page of `memory.grow`.
    pub memory_grow_cost: u32,
    /// Gas charged per local declared by a function, on every call.
    pub call_per_local_cost: u32,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self { instruction_cost: 1, memory_grow_cost: 10_000, call_per_local_cost: 1 }
    }
}
