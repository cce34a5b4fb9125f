use alloy_primitives::Bytes;
use radix_wasm_instrument::{
    gas_metering::{self, ConstantCostRules},
    utils::module_info::ModuleInfo,
};
use tracing::debug;

use crate::{
    constants::sandbox::{ETHEREUM_MODULE, USE_GAS_FUNCTION},
    Call, KernelError, MeteringConfig, Precompile, State,
};

/// Instruments a WebAssembly module with `ethereum.useGas` calls, so that running it charges gas
/// for every executed block of instructions.
#[derive(Clone, Copy, Debug, Default)]
pub struct MeteringInjector {
    config: MeteringConfig,
}

impl MeteringInjector {
    /// Creates an injector charging according to `config`.
    pub const fn new(config: MeteringConfig) -> Self {
        Self { config }
    }

    /// Validates `code` and returns it with metering injected.
    pub fn inject(&self, code: &[u8]) -> Result<Vec<u8>, KernelError> {
        wasmparser::validate(code).map_err(|err| KernelError::MeteringFailed(err.to_string()))?;
        let mut module =
            ModuleInfo::new(code).map_err(|err| KernelError::MeteringFailed(err.to_string()))?;

        let rules = ConstantCostRules::new(
            self.config.instruction_cost,
            self.config.memory_grow_cost,
            self.config.call_per_local_cost,
        );
        let backend = gas_metering::host_function::Injector::new(ETHEREUM_MODULE, USE_GAS_FUNCTION);
        gas_metering::inject(&mut module, backend, &rules)
            .map_err(|err| KernelError::MeteringFailed(err.to_string()))?;

        let metered = module.bytes();
        debug!(
            target: "ewasm::precompiles",
            before = code.len(),
            after = metered.len(),
            "Injected metering"
        );
        Ok(metered)
    }
}

impl Precompile for MeteringInjector {
    fn run(&self, call: &Call, _state: &State) -> Result<Bytes, KernelError> {
        self.inject(&call.data).map(Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_module() {
        let injector = MeteringInjector::default();
        let err = injector.inject(b"\0asm\x01\0\0\0\xff").unwrap_err();
        assert!(matches!(err, KernelError::MeteringFailed(_)));
        assert!(matches!(injector.inject(&[0x60, 0x00]), Err(KernelError::MeteringFailed(_))));
    }

    #[test]
    fn test_injects_use_gas_import() {
        let code = wat::parse_str(
            r#"(module
                (memory (export "memory") 1)
                (func (export "main") (drop (i32.add (i32.const 1) (i32.const 2)))))"#,
        )
        .unwrap();
        let metered = MeteringInjector::default().inject(&code).unwrap();
        assert_ne!(metered, code);

        let imports = wasmparser::Parser::new(0)
            .parse_all(&metered)
            .filter_map(|payload| match payload.unwrap() {
                wasmparser::Payload::ImportSection(reader) => Some(reader),
                _ => None,
            })
            .flat_map(|reader| reader.into_iter().map(|import| import.unwrap()))
            .map(|import| (import.module.to_string(), import.name.to_string()))
            .collect::<Vec<_>>();
        assert_eq!(imports, vec![(ETHEREUM_MODULE.to_string(), USE_GAS_FUNCTION.to_string())]);
    }
}
