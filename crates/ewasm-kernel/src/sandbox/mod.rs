//! The bytecode sandbox that runs native code against the capability interface.

use auto_impl::auto_impl;

use crate::{
    constants::sandbox::{WASM_MAGIC, WASM_VERSION},
    Interface, KernelError,
};

mod interpreter;
pub use interpreter::*;

/// Runs WebAssembly code in isolation.
///
/// The sandbox exposes `interface` to the code under the `ethereum` import namespace and runs the
/// exported `main` function, if any. It always hands the interface back, whether the code
/// completed, halted or faulted.
#[auto_impl(&, Box, Rc, Arc)]
pub trait Sandbox {
    /// Runs `code` bound to `interface`.
    fn execute(&self, code: &[u8], interface: Interface) -> SandboxOutcome;
}

/// The interface handed back by a [`Sandbox`], and how the execution ended.
#[derive(Debug)]
pub struct SandboxOutcome {
    /// The capability interface, with the environment and state as the code left them.
    pub interface: Interface,
    /// `Ok` when the code completed or halted, the fault otherwise.
    pub result: Result<(), KernelError>,
}

impl SandboxOutcome {
    /// An outcome for code that completed or halted.
    pub const fn success(interface: Interface) -> Self {
        Self { interface, result: Ok(()) }
    }

    /// An outcome for code that faulted.
    pub const fn failure(interface: Interface, error: KernelError) -> Self {
        Self { interface, result: Err(error) }
    }
}

/// Whether `code` is a WebAssembly module of the supported binary version.
pub fn is_wasm_code(code: &[u8]) -> bool {
    code.len() >= 8 && code[..4] == WASM_MAGIC && code[4..8] == WASM_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_wasm_code() {
        assert!(is_wasm_code(b"\0asm\x01\0\0\0"));
        assert!(!is_wasm_code(b"\0asm\x02\0\0\0"));
        assert!(!is_wasm_code(b"\0asm"));
        assert!(!is_wasm_code(&[0x60, 0x00, 0x60, 0x00, 0xf3, 0x00, 0x00, 0x00]));
    }
}
