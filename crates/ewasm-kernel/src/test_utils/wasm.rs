//! WebAssembly fixtures written in the text format.

use alloy_primitives::{Address, Bytes};

/// Assembles a module from the WebAssembly text format.
pub fn wasm(source: &str) -> Bytes {
    wat::parse_str(source).expect("invalid WebAssembly text").into()
}

/// Renders `bytes` as a WebAssembly data string literal.
pub fn data_string(bytes: impl AsRef<[u8]>) -> String {
    bytes.as_ref().iter().map(|byte| format!("\\{byte:02x}")).collect()
}

/// A contract that returns its call data unchanged.
pub fn echo_contract() -> Bytes {
    wasm(
        r#"(module
            (import "ethereum" "getCallDataSize" (func $size (result i32)))
            (import "ethereum" "callDataCopy" (func $copy (param i32 i32 i32)))
            (import "ethereum" "return" (func $return (param i32 i32)))
            (memory (export "memory") 1)
            (func (export "main")
                (call $copy (i32.const 0) (i32.const 0) (call $size))
                (call $return (i32.const 0) (call $size))))"#,
    )
}

/// A contract that returns its caller followed by the transaction origin, 40 bytes in total.
pub fn caller_origin_contract() -> Bytes {
    wasm(
        r#"(module
            (import "ethereum" "getCaller" (func $caller (param i32)))
            (import "ethereum" "getTxOrigin" (func $origin (param i32)))
            (import "ethereum" "return" (func $return (param i32 i32)))
            (memory (export "memory") 1)
            (func (export "main")
                (call $caller (i32.const 0))
                (call $origin (i32.const 20))
                (call $return (i32.const 0) (i32.const 40))))"#,
    )
}

/// A contract that calls `target` with `gas`, forwarding its own call data and returning the
/// child's return data. It traps when the child fails.
pub fn forwarder_contract(target: Address, gas: u64) -> Bytes {
    wasm(&format!(
        r#"(module
            (import "ethereum" "call" (func $call (param i64 i32 i32 i32 i32) (result i32)))
            (import "ethereum" "getCallDataSize" (func $size (result i32)))
            (import "ethereum" "callDataCopy" (func $copy (param i32 i32 i32)))
            (import "ethereum" "getReturnDataSize" (func $rsize (result i32)))
            (import "ethereum" "returnDataCopy" (func $rcopy (param i32 i32 i32)))
            (import "ethereum" "return" (func $return (param i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "{target}")
            (func (export "main")
                (call $copy (i32.const 64) (i32.const 0) (call $size))
                (if (call $call (i64.const {gas}) (i32.const 0) (i32.const 32) (i32.const 64) (call $size))
                    (then (unreachable)))
                (call $rcopy (i32.const 1024) (i32.const 0) (call $rsize))
                (call $return (i32.const 1024) (call $rsize))))"#,
        target = data_string(target),
    ))
}

/// A contract that consumes `amount` gas and completes.
pub fn gas_burner_contract(amount: u64) -> Bytes {
    wasm(&format!(
        r#"(module
            (import "ethereum" "useGas" (func $use_gas (param i64)))
            (memory (export "memory") 1)
            (func (export "main") (call $use_gas (i64.const {amount}))))"#
    ))
}

/// A contract that self-destructs in favor of `beneficiary`.
pub fn self_destruct_contract(beneficiary: Address) -> Bytes {
    wasm(&format!(
        r#"(module
            (import "ethereum" "selfDestruct" (func $self_destruct (param i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "{beneficiary}")
            (func (export "main") (call $self_destruct (i32.const 0))))"#,
        beneficiary = data_string(beneficiary),
    ))
}

/// A contract that traps immediately.
pub fn trap_contract() -> Bytes {
    wasm(
        r#"(module
            (memory (export "memory") 1)
            (func (export "main") unreachable))"#,
    )
}
