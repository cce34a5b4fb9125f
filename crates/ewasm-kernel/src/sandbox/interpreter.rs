use core::cell::RefCell;

use alloy_primitives::{keccak256, map::HashMap, Address, Bytes, B256, U256};
use tracing::{debug, trace};
use wasmi::{Caller, Engine, Extern, Linker, Memory, Module, Store};

use crate::{
    constants::{
        limits::MAX_LOG_TOPICS,
        sandbox::{DEBUG_MODULE, ETHEREUM_MODULE, MAIN_EXPORT, MEMORY_EXPORT, USE_GAS_FUNCTION},
    },
    Interface, KernelError, Sandbox, SandboxOutcome,
};

/// The message of the trap raised to unwind the code once it halted.
const HALT: &str = "halted";

/// The data of a [`Store`]: the capability interface of the running call and the fault that
/// ended it, if any.
#[derive(Debug)]
struct HostState {
    interface: Interface,
    fault: Option<KernelError>,
}

/// A [`Sandbox`] backed by the `wasmi` interpreter.
///
/// All executions share one [`Engine`], and compiled modules are cached by code hash.
#[derive(Debug, Default)]
pub struct WasmiSandbox {
    engine: Engine,
    modules: RefCell<HashMap<B256, Module>>,
}

impl WasmiSandbox {
    /// Creates a sandbox with an empty module cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of compiled modules in the cache.
    pub fn cached_modules(&self) -> usize {
        self.modules.borrow().len()
    }

    fn compile(&self, code: &[u8]) -> Result<Module, KernelError> {
        let hash = keccak256(code);
        if let Some(module) = self.modules.borrow().get(&hash) {
            return Ok(module.clone());
        }
        let module = Module::new(&self.engine, code).map_err(KernelError::sandbox)?;
        self.modules.borrow_mut().insert(hash, module.clone());
        Ok(module)
    }

    fn run(&self, module: &Module, store: &mut Store<HostState>) -> Result<(), wasmi::Error> {
        let linker = self.linker()?;
        let instance = linker.instantiate(&mut *store, module)?.start(&mut *store)?;
        let Some(main) = instance.get_func(&*store, MAIN_EXPORT) else {
            return Ok(());
        };
        main.typed::<(), ()>(&*store)?.call(&mut *store, ())
    }

    fn linker(&self) -> Result<Linker<HostState>, wasmi::Error> {
        let mut linker = Linker::<HostState>::new(&self.engine);
        define_ethereum_module(&mut linker)?;
        define_debug_module(&mut linker)?;
        Ok(linker)
    }
}

impl Sandbox for WasmiSandbox {
    fn execute(&self, code: &[u8], interface: Interface) -> SandboxOutcome {
        let module = match self.compile(code) {
            Ok(module) => module,
            Err(error) => return SandboxOutcome::failure(interface, error),
        };

        let mut store = Store::new(&self.engine, HostState { interface, fault: None });
        let result = self.run(&module, &mut store);
        let HostState { interface, fault } = store.into_data();

        match (result, fault) {
            (Ok(()), _) => SandboxOutcome::success(interface),
            (Err(_), Some(fault)) => SandboxOutcome::failure(interface, fault),
            (Err(_), None) if interface.is_halted() => SandboxOutcome::success(interface),
            (Err(error), None) => SandboxOutcome::failure(interface, KernelError::sandbox(error)),
        }
    }
}

/// Runs a capability against the interface of the calling instance. A failed capability records
/// its fault and traps; a capability that halts the code traps after it completed.
fn host<R>(
    caller: &mut Caller<'_, HostState>,
    f: impl FnOnce(&mut Caller<'_, HostState>) -> Result<R, KernelError>,
) -> Result<R, wasmi::Error> {
    match f(caller) {
        Ok(_) if caller.data().interface.is_halted() => Err(wasmi::Error::new(HALT)),
        Ok(value) => Ok(value),
        Err(error) => {
            let message = error.to_string();
            caller.data_mut().fault = Some(error);
            Err(wasmi::Error::new(message))
        }
    }
}

fn memory(caller: &Caller<'_, HostState>) -> Result<Memory, KernelError> {
    caller
        .get_export(MEMORY_EXPORT)
        .and_then(Extern::into_memory)
        .ok_or_else(|| KernelError::Sandbox(format!("missing `{MEMORY_EXPORT}` export")))
}

/// Returns the exported memory after checking that it holds `len` bytes at `ptr`. Pointers and
/// lengths are unsigned 32-bit values.
fn memory_range(
    caller: &Caller<'_, HostState>,
    ptr: i32,
    len: usize,
) -> Result<(Memory, usize), KernelError> {
    let memory = memory(caller)?;
    let offset = ptr as u32 as usize;
    match offset.checked_add(len) {
        Some(end) if end <= memory.data_size(caller) => Ok((memory, offset)),
        _ => Err(KernelError::MemoryAccess { offset: offset as u64, length: len as u64 }),
    }
}

fn read_memory(
    caller: &Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>, KernelError> {
    let len = len as u32 as usize;
    let (memory, offset) = memory_range(caller, ptr, len)?;
    let mut buffer = vec![0; len];
    memory
        .read(caller, offset, &mut buffer)
        .map_err(|_| KernelError::MemoryAccess { offset: offset as u64, length: len as u64 })?;
    Ok(buffer)
}

fn read_array<const N: usize>(
    caller: &Caller<'_, HostState>,
    ptr: i32,
) -> Result<[u8; N], KernelError> {
    let (memory, offset) = memory_range(caller, ptr, N)?;
    let mut buffer = [0; N];
    memory
        .read(caller, offset, &mut buffer)
        .map_err(|_| KernelError::MemoryAccess { offset: offset as u64, length: N as u64 })?;
    Ok(buffer)
}

fn write_memory(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    bytes: &[u8],
) -> Result<(), KernelError> {
    let length = bytes.len();
    let (memory, offset) = memory_range(caller, ptr, length)?;
    memory
        .write(&mut *caller, offset, bytes)
        .map_err(|_| KernelError::MemoryAccess { offset: offset as u64, length: length as u64 })
}

/// Copies `len` bytes of `source` starting at `offset` into memory at `ptr`, padding with zeros
/// past the end of `source`.
fn copy_padded(
    caller: &mut Caller<'_, HostState>,
    source: impl FnOnce(&Interface) -> &Bytes,
    ptr: i32,
    offset: i32,
    len: i32,
) -> Result<(), KernelError> {
    let (offset, len) = (offset as u32 as usize, len as u32 as usize);
    memory_range(caller, ptr, len)?;
    let mut buffer = vec![0; len];
    if let Some(available) = source(&caller.data().interface).get(offset..) {
        let n = available.len().min(len);
        buffer[..n].copy_from_slice(&available[..n]);
    }
    write_memory(caller, ptr, &buffer)
}

fn read_address(caller: &Caller<'_, HostState>, ptr: i32) -> Result<Address, KernelError> {
    read_array::<20>(caller, ptr).map(Address::from)
}

fn read_u256(caller: &Caller<'_, HostState>, ptr: i32) -> Result<U256, KernelError> {
    read_array::<32>(caller, ptr).map(U256::from_be_bytes)
}

fn define_ethereum_module(linker: &mut Linker<HostState>) -> Result<(), wasmi::Error> {
    linker.func_wrap(
        ETHEREUM_MODULE,
        USE_GAS_FUNCTION,
        |mut caller: Caller<'_, HostState>, amount: i64| {
            host(&mut caller, |caller| caller.data_mut().interface.use_gas(amount as u64))
        },
    )?;
    linker.func_wrap(ETHEREUM_MODULE, "getGasLeft", |caller: Caller<'_, HostState>| {
        caller.data().interface.gas_left().min(i64::MAX as u64) as i64
    })?;
    linker.func_wrap(
        ETHEREUM_MODULE,
        "getAddress",
        |mut caller: Caller<'_, HostState>, result_ptr: i32| {
            host(&mut caller, |caller| {
                let address = caller.data().interface.address();
                write_memory(caller, result_ptr, address.as_slice())
            })
        },
    )?;
    linker.func_wrap(
        ETHEREUM_MODULE,
        "getCaller",
        |mut caller: Caller<'_, HostState>, result_ptr: i32| {
            host(&mut caller, |caller| {
                let address = caller.data().interface.caller();
                write_memory(caller, result_ptr, address.as_slice())
            })
        },
    )?;
    linker.func_wrap(
        ETHEREUM_MODULE,
        "getTxOrigin",
        |mut caller: Caller<'_, HostState>, result_ptr: i32| {
            host(&mut caller, |caller| {
                let address = caller.data().interface.origin();
                write_memory(caller, result_ptr, address.as_slice())
            })
        },
    )?;
    linker.func_wrap(
        ETHEREUM_MODULE,
        "getCallValue",
        |mut caller: Caller<'_, HostState>, result_ptr: i32| {
            host(&mut caller, |caller| {
                let value = caller.data().interface.call_value();
                write_memory(caller, result_ptr, &value.to_be_bytes::<32>())
            })
        },
    )?;
    linker.func_wrap(ETHEREUM_MODULE, "getCallDataSize", |caller: Caller<'_, HostState>| {
        caller.data().interface.call_data().len() as i32
    })?;
    linker.func_wrap(
        ETHEREUM_MODULE,
        "callDataCopy",
        |mut caller: Caller<'_, HostState>, result_ptr: i32, offset: i32, len: i32| {
            host(&mut caller, |caller| {
                copy_padded(caller, Interface::call_data, result_ptr, offset, len)
            })
        },
    )?;
    linker.func_wrap(
        ETHEREUM_MODULE,
        "getExternalBalance",
        |mut caller: Caller<'_, HostState>, address_ptr: i32, result_ptr: i32| {
            host(&mut caller, |caller| {
                let address = read_address(caller, address_ptr)?;
                let balance = caller.data().interface.balance(&address);
                write_memory(caller, result_ptr, &balance.to_be_bytes::<32>())
            })
        },
    )?;
    linker.func_wrap(
        ETHEREUM_MODULE,
        "call",
        |mut caller: Caller<'_, HostState>,
         gas: i64,
         address_ptr: i32,
         value_ptr: i32,
         data_ptr: i32,
         data_len: i32| {
            host(&mut caller, |caller| {
                let to = read_address(caller, address_ptr)?;
                let value = read_u256(caller, value_ptr)?;
                let data = read_memory(caller, data_ptr, data_len)?;
                let success =
                    caller.data_mut().interface.call(to, gas as u64, value, Bytes::from(data))?;
                Ok(i32::from(!success))
            })
        },
    )?;
    linker.func_wrap(
        ETHEREUM_MODULE,
        "create",
        |mut caller: Caller<'_, HostState>,
         value_ptr: i32,
         data_ptr: i32,
         data_len: i32,
         result_ptr: i32| {
            host(&mut caller, |caller| {
                let value = read_u256(caller, value_ptr)?;
                let code = read_memory(caller, data_ptr, data_len)?;
                match caller.data_mut().interface.create(value, Bytes::from(code))? {
                    Some(address) => {
                        write_memory(caller, result_ptr, address.as_slice())?;
                        Ok(0)
                    }
                    None => Ok(1),
                }
            })
        },
    )?;
    linker.func_wrap(ETHEREUM_MODULE, "getReturnDataSize", |caller: Caller<'_, HostState>| {
        caller.data().interface.return_data().len() as i32
    })?;
    linker.func_wrap(
        ETHEREUM_MODULE,
        "returnDataCopy",
        |mut caller: Caller<'_, HostState>, result_ptr: i32, offset: i32, len: i32| {
            host(&mut caller, |caller| {
                copy_padded(caller, Interface::return_data, result_ptr, offset, len)
            })
        },
    )?;
    linker.func_wrap(
        ETHEREUM_MODULE,
        "return",
        |mut caller: Caller<'_, HostState>, data_ptr: i32, data_len: i32| {
            host(&mut caller, |caller| {
                let data = read_memory(caller, data_ptr, data_len)?;
                caller.data_mut().interface.finish(Bytes::from(data))
            })
        },
    )?;
    linker.func_wrap(
        ETHEREUM_MODULE,
        "log",
        |mut caller: Caller<'_, HostState>,
         data_ptr: i32,
         data_len: i32,
         topic_count: i32,
         topic1: i32,
         topic2: i32,
         topic3: i32,
         topic4: i32| {
            host(&mut caller, |caller| {
                let count = topic_count as u32 as usize;
                if count > MAX_LOG_TOPICS {
                    return Err(KernelError::InvalidLog { topics: count, limit: MAX_LOG_TOPICS });
                }
                let topics = [topic1, topic2, topic3, topic4][..count]
                    .iter()
                    .map(|ptr| read_array::<32>(caller, *ptr).map(B256::from))
                    .collect::<Result<Vec<_>, _>>()?;
                let data = read_memory(caller, data_ptr, data_len)?;
                caller.data_mut().interface.log(topics, Bytes::from(data))
            })
        },
    )?;
    linker.func_wrap(
        ETHEREUM_MODULE,
        "selfDestruct",
        |mut caller: Caller<'_, HostState>, address_ptr: i32| {
            host(&mut caller, |caller| {
                let beneficiary = read_address(caller, address_ptr)?;
                caller.data_mut().interface.self_destruct(beneficiary)
            })
        },
    )?;
    Ok(())
}

fn define_debug_module(linker: &mut Linker<HostState>) -> Result<(), wasmi::Error> {
    linker.func_wrap(DEBUG_MODULE, "print32", |caller: Caller<'_, HostState>, value: i32| {
        let address = caller.data().interface.address();
        debug!(target: "ewasm::debug", %address, value, "print32");
    })?;
    linker.func_wrap(DEBUG_MODULE, "print64", |caller: Caller<'_, HostState>, value: i64| {
        let address = caller.data().interface.address();
        debug!(target: "ewasm::debug", %address, value, "print64");
    })?;
    linker.func_wrap(
        DEBUG_MODULE,
        "printMem",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| {
            host(&mut caller, |caller| {
                let bytes = read_memory(caller, ptr, len)?;
                let address = caller.data().interface.address();
                debug!(target: "ewasm::debug", %address, mem = %Bytes::from(bytes), "printMem");
                Ok(())
            })
        },
    )?;
    trace!(target: "ewasm::sandbox", "Defined host functions");
    Ok(())
}
