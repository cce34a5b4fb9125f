//! Constants for the ewasm kernel.
//!
//! It groups the constants by the concern they belong to as sub-modules.

/// Reserved addresses of the precompiled contracts.
pub mod precompiles {
    use alloy_primitives::{address, Address};

    /// The identity precompile, returning its call data unchanged.
    pub const IDENTITY: Address = address!("0000000000000000000000000000000000000004");
    /// The metering injector precompile, instrumenting native code with `useGas` calls.
    pub const METERING_INJECTOR: Address = address!("000000000000000000000000000000000000000a");
    /// The transcompiler precompile, rewriting legacy EVM bytecode into WebAssembly.
    pub const TRANSCOMPILER: Address = address!("000000000000000000000000000000000000000b");
}

/// Names shared with the code running inside the sandbox.
pub mod sandbox {
    /// The import namespace of the capability interface.
    pub const ETHEREUM_MODULE: &str = "ethereum";
    /// The import namespace of the tracing-only debug functions.
    pub const DEBUG_MODULE: &str = "debug";
    /// The exported entry point run for every call.
    pub const MAIN_EXPORT: &str = "main";
    /// The exported linear memory the capability interface reads from and writes to.
    pub const MEMORY_EXPORT: &str = "memory";
    /// The capability used by metered code to charge gas.
    pub const USE_GAS_FUNCTION: &str = "useGas";

    /// The magic bytes every WebAssembly module starts with.
    pub const WASM_MAGIC: [u8; 4] = *b"\0asm";
    /// The only WebAssembly binary version the sandbox accepts.
    pub const WASM_VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

    /// Status prefix of a successful transcompilation.
    pub const TRANSCOMPILE_SUCCESS: u8 = 0;
    /// Status prefix of a failed transcompilation.
    pub const TRANSCOMPILE_FAILURE: u8 = 1;
}

/// Gas constants charged by the kernel and the transcompiled code.
pub mod gas {
    use revm::interpreter::gas;

    /// Constants inherited from `revm`.
    pub use gas::{BASE, CODEDEPOSIT, JUMPDEST, LOG, LOGDATA, LOGTOPIC, LOW, MEMORY, VERYLOW};

    /// Static gas of the `SELFDESTRUCT` opcode.
    pub const SELFDESTRUCT: u64 = 5_000;
}

/// Limits enforced by the kernel.
pub mod limits {
    /// The default maximum depth of nested calls. The top-level call runs at depth zero.
    pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;
    /// The maximum number of topics a single log may carry.
    pub const MAX_LOG_TOPICS: usize = 4;
    /// The EVM operand stack limit honored by the transcompiler.
    pub use revm::primitives::STACK_LIMIT;
    /// The largest EVM memory offset the transcompiler will lay out, in bytes.
    pub const MAX_TRANSCOMPILED_MEMORY: usize = 32 * 1024;
    /// The most linear memory the data segments of a transcompiled module may occupy, in bytes.
    pub const MAX_TRANSCOMPILED_SEGMENTS: usize = 256 * 64 * 1024;
}
