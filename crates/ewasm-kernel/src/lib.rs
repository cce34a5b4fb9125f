//! The message-dispatch and execution-context kernel for an ewasm contract runtime.
//!
//! A [`Kernel`] resolves every [`Call`] to either a precompiled contract or an account with code,
//! builds a fresh [`Environment`] for it, and runs the code inside a [`Sandbox`] that talks back
//! to the kernel only through the capability [`Interface`]. Legacy EVM bytecode is transparently
//! transcompiled into WebAssembly before execution. The [`BlockRunner`] layers the transaction
//! gas-purchase protocol and sequential block application on top of the kernel.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod constants;

mod block;
pub use block::*;

mod config;
pub use config::*;

mod environment;
pub use environment::*;

mod error;
pub use error::*;

mod interface;
pub use interface::*;

mod kernel;
pub use kernel::*;

pub mod precompiles;
pub use precompiles::{Precompile, Precompiles};

pub mod sandbox;
pub use sandbox::{Sandbox, SandboxOutcome, WasmiSandbox};

mod state;
pub use state::*;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod types;
pub use types::*;

// Re-export the primitive and opcode crates so that downstream users agree on versions.
pub use alloy_primitives;
pub use revm;
