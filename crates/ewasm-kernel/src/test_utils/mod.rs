//! Test utilities for the ewasm kernel.

mod opcode_gen;
mod state;
mod wasm;

pub use opcode_gen::*;
pub use state::*;
pub use wasm::*;

/// Installs a `tracing` subscriber honoring `RUST_LOG`, once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
