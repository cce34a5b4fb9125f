//! Tests for running legacy EVM bytecode through the transcompiler and for the metering injector.

use alloy_primitives::{address, Address, Bytes, B256, U256};
use ewasm_kernel::{
    constants::{
        gas,
        precompiles::{METERING_INJECTOR, TRANSCOMPILER},
        sandbox::TRANSCOMPILE_SUCCESS,
    },
    precompiles::transcompile,
    revm::bytecode::opcode::{ADD, INVALID, JUMP, MSTORE, MUL, PUSH1, RETURN},
    sandbox::is_wasm_code,
    test_utils::{echo_contract, wasm, BytecodeBuilder, MemoryState},
    Call, Kernel, KernelConfig, KernelError, Log, Precompile, Precompiles, State, WasmiSandbox,
};

const SENDER: Address = address!("0000000000000000000000000000000000100000");
const CONTRACT: Address = address!("0000000000000000000000000000000000100001");
const BENEFICIARY: Address = address!("0000000000000000000000000000000000BEEF01");

const GAS_LIMIT: u64 = 1_000_000;

fn execute(kernel: &Kernel, state: &mut MemoryState) -> ewasm_kernel::CallResult {
    kernel.execute(&Call::new(SENDER, CONTRACT, GAS_LIMIT), state)
}

#[test]
fn test_legacy_return() {
    let code = BytecodeBuilder::default().return_with_data([0xaa_u8]).build();
    let mut state = MemoryState::default().account_code(CONTRACT, code.clone());
    let result = execute(&Kernel::default(), &mut state);
    assert!(result.is_success(), "{:?}", result.error());
    assert_eq!(result.return_value.as_ref(), &[0xaa]);
    // PUSH32, PUSH8, MSTORE and one word of memory, then two PUSH8 for RETURN.
    assert_eq!(result.gas_left, GAS_LIMIT - 6 * gas::VERYLOW);
    assert_eq!(state.account_code(&CONTRACT), Some(&code), "the stored code is untouched");
}

#[test]
fn test_legacy_arithmetic() {
    // (2 + 3) * 4, stored at 0 and returned as a full word.
    let code = BytecodeBuilder::default()
        .append_many([PUSH1, 4, PUSH1, 3, PUSH1, 2, ADD, MUL])
        .append_many([PUSH1, 0, MSTORE, PUSH1, 32, PUSH1, 0, RETURN])
        .build();
    let mut state = MemoryState::default().account_code(CONTRACT, code);
    let result = execute(&Kernel::default(), &mut state);
    assert!(result.is_success(), "{:?}", result.error());
    assert_eq!(U256::from_be_slice(&result.return_value), U256::from(20));
}

#[test]
fn test_legacy_log() {
    let topic = B256::repeat_byte(0x22);
    let data = [0x33_u8; 32];
    let code = BytecodeBuilder::default().log(&[topic], data).build();
    let mut state = MemoryState::default().account_code(CONTRACT, code);
    let result = execute(&Kernel::default(), &mut state);
    assert!(result.is_success(), "{:?}", result.error());
    assert_eq!(
        result.logs,
        vec![Log { address: CONTRACT, topics: vec![topic], data: Bytes::from(data.to_vec()) }]
    );
    let log_cost = gas::LOG + gas::LOGTOPIC + 32 * gas::LOGDATA;
    assert_eq!(result.gas_left, GAS_LIMIT - 7 * gas::VERYLOW - log_cost);
}

#[test]
fn test_legacy_self_destruct() {
    let code = BytecodeBuilder::default().self_destruct(BENEFICIARY).build();
    let mut state = MemoryState::default()
        .account_balance(CONTRACT, U256::from(9))
        .account_code(CONTRACT, code);
    let result = execute(&Kernel::default(), &mut state);
    assert!(result.is_success(), "{:?}", result.error());
    assert_eq!(result.self_destruct, Some(BENEFICIARY));
    assert_eq!(result.gas_left, GAS_LIMIT - gas::VERYLOW - gas::SELFDESTRUCT);
    assert!(!state.contains_account(&CONTRACT));
    assert_eq!(state.balance(&BENEFICIARY), Some(U256::from(9)));
}

#[test]
fn test_legacy_out_of_gas() {
    let code = BytecodeBuilder::default().self_destruct(BENEFICIARY).build();
    let mut state = MemoryState::default()
        .account_balance(CONTRACT, U256::from(9))
        .account_code(CONTRACT, code)
        .into_state();
    let before = state.clone();
    let call = Call::new(SENDER, CONTRACT, gas::SELFDESTRUCT);
    let result = Kernel::default().execute(&call, &mut state);
    assert!(matches!(result.error(), Some(KernelError::OutOfGas { .. })));
    assert_eq!(state, before);
}

#[test]
fn test_legacy_invalid() {
    let code = BytecodeBuilder::default().append(INVALID).build();
    let mut state = MemoryState::default().account_code(CONTRACT, code);
    let result = execute(&Kernel::default(), &mut state);
    assert!(matches!(result.error(), Some(KernelError::Sandbox(_))));
}

#[test]
fn test_legacy_stop_without_output() {
    let mut state = MemoryState::default().account_code(CONTRACT, Bytes::from_static(&[0x00]));
    let result = execute(&Kernel::default(), &mut state);
    assert!(result.is_success());
    assert!(result.return_value.is_empty());
    assert_eq!(result.gas_left, GAS_LIMIT);
}

#[test]
fn test_unsupported_legacy_code() {
    let code = BytecodeBuilder::default().append_many([PUSH1, 0, JUMP]).build();
    let mut state = MemoryState::default().account_code(CONTRACT, code);
    let result = execute(&Kernel::default(), &mut state);
    assert_eq!(
        result.error(),
        Some(&KernelError::TranscompilationFailed("unsupported opcode JUMP at pc=2".to_string()))
    );
}

#[test]
fn test_transcompilation_disabled() {
    let config = KernelConfig::default().with_transcompile_legacy_code(false);
    let code = BytecodeBuilder::default().return_empty().build();
    let mut state = MemoryState::default().account_code(CONTRACT, code);
    let result = execute(&Kernel::new(config), &mut state);
    assert_eq!(result.error(), Some(&KernelError::UnsupportedCodeFormat(CONTRACT)));
}

/// A transcompiler that reports success but hands the legacy code back unchanged.
#[derive(Debug)]
struct Passthrough;

impl Precompile for Passthrough {
    fn run(&self, call: &Call, _state: &State) -> Result<Bytes, KernelError> {
        Ok([&[TRANSCOMPILE_SUCCESS][..], &call.data[..]].concat().into())
    }
}

#[test]
fn test_transcompilation_runs_at_most_once() {
    let mut precompiles = Precompiles::standard().clone();
    precompiles.insert(TRANSCOMPILER, Passthrough);
    let kernel = Kernel::with_parts(KernelConfig::default(), precompiles, WasmiSandbox::new());

    let code = BytecodeBuilder::default().return_empty().build();
    let mut state = MemoryState::default().account_code(CONTRACT, code);
    let result = execute(&kernel, &mut state);
    assert_eq!(result.error(), Some(&KernelError::UnsupportedCodeFormat(CONTRACT)));
}

#[test]
fn test_transcompiler_precompile() {
    let code = BytecodeBuilder::default().return_with_data(b"legacy").build();
    let call = Call::new(SENDER, TRANSCOMPILER, 0).with_data(code.clone());
    let result = Kernel::default().execute(&call, &mut State::default());
    assert!(result.is_success());
    assert_eq!(result.return_value[0], TRANSCOMPILE_SUCCESS);
    assert!(is_wasm_code(&result.return_value[1..]));
    assert_eq!(&result.return_value[1..], transcompile(&code).unwrap().as_slice());
}

#[test]
fn test_metering_injector_precompile() {
    let call = Call::new(SENDER, METERING_INJECTOR, 0).with_data(echo_contract());
    let result = Kernel::default().execute(&call, &mut State::default());
    assert!(result.is_success(), "{:?}", result.error());
    assert!(is_wasm_code(&result.return_value));
    assert_ne!(result.return_value, echo_contract());
}

#[test]
fn test_metering_injector_rejects_invalid_module() {
    let call = Call::new(SENDER, METERING_INJECTOR, 0).with_data(Bytes::from_static(b"\0asm"));
    let result = Kernel::default().execute(&call, &mut State::default());
    assert!(matches!(result.error(), Some(KernelError::MeteringFailed(_))));
}

#[test]
fn test_deployed_code_is_metered() {
    let kernel = Kernel::new(KernelConfig::default().with_meter_deployed_code(true));
    let mut state = MemoryState::default().account_balance(SENDER, U256::ZERO);

    let deploy = Call::new(SENDER, Address::ZERO, GAS_LIMIT).with_data(echo_contract());
    let result = kernel.execute(&deploy, &mut state);
    assert!(result.is_success(), "{:?}", result.error());
    let deployed = Address::from_slice(&result.return_value);
    let stored = state.account_code(&deployed).cloned().unwrap();
    assert_ne!(stored, echo_contract());
    assert_eq!(result.gas_left, GAS_LIMIT - gas::CODEDEPOSIT * stored.len() as u64);

    let call = Call::new(SENDER, deployed, GAS_LIMIT).with_data(Bytes::from_static(b"metered"));
    let result = kernel.execute(&call, &mut state);
    assert!(result.is_success(), "{:?}", result.error());
    assert_eq!(result.return_value, Bytes::from_static(b"metered"));
    assert!(result.gas_left < GAS_LIMIT, "metered code pays for its instructions");
}

#[test]
fn test_metered_deployment_of_invalid_module() {
    let kernel = Kernel::new(KernelConfig::default().with_meter_deployed_code(true));
    let mut state = MemoryState::default().account_balance(SENDER, U256::ZERO).into_state();
    let before = state.clone();
    let deploy = Call::new(SENDER, Address::ZERO, GAS_LIMIT)
        .with_data(wasm(r#"(module (memory (export "memory") 1))"#).slice(..10));
    let result = kernel.execute(&deploy, &mut state);
    assert!(matches!(result.error(), Some(KernelError::MeteringFailed(_))));
    assert_eq!(state, before);
}
