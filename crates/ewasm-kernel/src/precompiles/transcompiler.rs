use alloy_primitives::{Address, Bytes, B256, U256};
use revm::bytecode::opcode::{self, OpCode};
use tracing::debug;
use wasm_encoder::{
    CodeSection, ConstExpr, DataSection, EntityType, ExportKind, ExportSection, Function,
    FunctionSection, ImportSection, Instruction, MemorySection, MemoryType, Module, TypeSection,
    ValType,
};

use crate::{
    constants::{
        gas,
        limits::{MAX_TRANSCOMPILED_MEMORY, MAX_TRANSCOMPILED_SEGMENTS, STACK_LIMIT},
        sandbox::{
            ETHEREUM_MODULE, MAIN_EXPORT, MEMORY_EXPORT, TRANSCOMPILE_FAILURE,
            TRANSCOMPILE_SUCCESS, USE_GAS_FUNCTION,
        },
    },
    Call, KernelError, Precompile, State,
};

/// Rewrites legacy EVM bytecode into an equivalent WebAssembly module.
///
/// The output is status-prefixed: [`TRANSCOMPILE_SUCCESS`] followed by the module, or
/// [`TRANSCOMPILE_FAILURE`] followed by a UTF-8 diagnostic.
#[derive(Clone, Copy, Debug, Default)]
pub struct Transcompiler;

impl Precompile for Transcompiler {
    fn run(&self, call: &Call, _state: &State) -> Result<Bytes, KernelError> {
        let mut output = Vec::new();
        match transcompile(&call.data) {
            Ok(module) => {
                output.push(TRANSCOMPILE_SUCCESS);
                output.extend(module);
            }
            Err(err) => {
                debug!(target: "ewasm::precompiles", %err, "Transcompilation rejected");
                output.push(TRANSCOMPILE_FAILURE);
                output.extend(err.to_string().into_bytes());
            }
        }
        Ok(output.into())
    }
}

/// Reasons legacy bytecode cannot be transcompiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscompileError {
    /// The opcode is outside the supported straight-line subset.
    #[error("unsupported opcode {name} at pc={pc}")]
    UnsupportedOpcode {
        /// The name of the opcode, or its hex value when undefined
        name: String,
        /// The program counter of the opcode
        pc: usize,
    },
    /// An opcode popped more values than the stack holds.
    #[error("stack underflow at pc={pc}")]
    StackUnderflow {
        /// The program counter of the opcode
        pc: usize,
    },
    /// An opcode pushed beyond the stack limit.
    #[error("stack overflow at pc={pc}")]
    StackOverflow {
        /// The program counter of the opcode
        pc: usize,
    },
    /// A memory access reaches beyond the translation limit.
    #[error("memory access beyond {limit} bytes at pc={pc}")]
    MemoryLimit {
        /// The program counter of the opcode
        pc: usize,
        /// The memory limit
        limit: usize,
    },
}

/// Indices of the imported capabilities, in import order.
mod imports {
    pub(super) const USE_GAS: u32 = 0;
    pub(super) const RETURN: u32 = 1;
    pub(super) const LOG: u32 = 2;
    pub(super) const SELF_DESTRUCT: u32 = 3;
    pub(super) const MAIN: u32 = 4;
}

const WASM_PAGE_SIZE: usize = 64 * 1024;
const WORD_SIZE: usize = 32;

/// Transcompiles `code` into a WebAssembly module exporting `main` and `memory`.
///
/// The translation folds the straight-line EVM subset at compile time: the operand stack and the
/// memory are evaluated while translating, so the module only keeps the observable effects (gas
/// charges, logs, the return value and self-destruct) in program order. Each effect reads a
/// snapshot of the memory it refers to from its own data segment.
pub fn transcompile(code: &[u8]) -> Result<Vec<u8>, TranscompileError> {
    let mut translator = Translator::default();
    let mut pc = 0;
    while pc < code.len() {
        let op = code[pc];
        match translator.step(op, pc, code)? {
            Flow::Continue(next) => pc = next,
            Flow::Stop => break,
        }
    }
    translator.finish_function();
    Ok(translator.encode())
}

enum Flow {
    Continue(usize),
    Stop,
}

#[derive(Debug)]
struct Translator {
    stack: Vec<U256>,
    memory: Vec<u8>,
    pending_gas: u64,
    body: Function,
    segments: Vec<(u32, Vec<u8>)>,
    segment_cursor: usize,
    finished: bool,
}

impl Default for Translator {
    fn default() -> Self {
        Self {
            stack: Vec::new(),
            memory: Vec::new(),
            pending_gas: 0,
            body: Function::new(Vec::new()),
            segments: Vec::new(),
            segment_cursor: 0,
            finished: false,
        }
    }
}

impl Translator {
    fn step(&mut self, op: u8, pc: usize, code: &[u8]) -> Result<Flow, TranscompileError> {
        match op {
            opcode::STOP => return Ok(Flow::Stop),
            opcode::ADD => self.binary(pc, gas::VERYLOW, |a, b| a.wrapping_add(b))?,
            opcode::MUL => self.binary(pc, gas::LOW, |a, b| a.wrapping_mul(b))?,
            opcode::SUB => self.binary(pc, gas::VERYLOW, |a, b| a.wrapping_sub(b))?,
            opcode::DIV => self.binary(pc, gas::LOW, |a, b| a.checked_div(b).unwrap_or_default())?,
            opcode::MOD => self.binary(pc, gas::LOW, |a, b| a.checked_rem(b).unwrap_or_default())?,
            opcode::LT => self.binary(pc, gas::VERYLOW, |a, b| U256::from(a < b))?,
            opcode::GT => self.binary(pc, gas::VERYLOW, |a, b| U256::from(a > b))?,
            opcode::EQ => self.binary(pc, gas::VERYLOW, |a, b| U256::from(a == b))?,
            opcode::AND => self.binary(pc, gas::VERYLOW, |a, b| a & b)?,
            opcode::OR => self.binary(pc, gas::VERYLOW, |a, b| a | b)?,
            opcode::XOR => self.binary(pc, gas::VERYLOW, |a, b| a ^ b)?,
            opcode::SHL => self.binary(pc, gas::VERYLOW, |shift, value| {
                if shift < U256::from(256) {
                    value << shift.saturating_to::<usize>()
                } else {
                    U256::ZERO
                }
            })?,
            opcode::SHR => self.binary(pc, gas::VERYLOW, |shift, value| {
                if shift < U256::from(256) {
                    value >> shift.saturating_to::<usize>()
                } else {
                    U256::ZERO
                }
            })?,
            opcode::ISZERO => {
                self.pending_gas += gas::VERYLOW;
                let a = self.pop(pc)?;
                self.push(pc, U256::from(a.is_zero()))?;
            }
            opcode::NOT => {
                self.pending_gas += gas::VERYLOW;
                let a = self.pop(pc)?;
                self.push(pc, !a)?;
            }
            opcode::POP => {
                self.pending_gas += gas::BASE;
                self.pop(pc)?;
            }
            opcode::PUSH0 => {
                self.pending_gas += gas::BASE;
                self.push(pc, U256::ZERO)?;
            }
            opcode::PUSH1..=opcode::PUSH32 => {
                self.pending_gas += gas::VERYLOW;
                let len = (op - opcode::PUSH1 + 1) as usize;
                let start = (pc + 1).min(code.len());
                let end = (pc + 1 + len).min(code.len());
                // Immediates cut off by the end of the code are padded with zeros on the right.
                let mut word = [0u8; WORD_SIZE];
                word[WORD_SIZE - len..WORD_SIZE - len + (end - start)]
                    .copy_from_slice(&code[start..end]);
                self.push(pc, U256::from_be_bytes(word))?;
                return Ok(Flow::Continue(pc + 1 + len));
            }
            opcode::DUP1..=opcode::DUP16 => {
                self.pending_gas += gas::VERYLOW;
                let depth = (op - opcode::DUP1 + 1) as usize;
                let index = self.stack.len().checked_sub(depth);
                let value = index
                    .map(|index| self.stack[index])
                    .ok_or(TranscompileError::StackUnderflow { pc })?;
                self.push(pc, value)?;
            }
            opcode::SWAP1..=opcode::SWAP16 => {
                self.pending_gas += gas::VERYLOW;
                let depth = (op - opcode::SWAP1 + 1) as usize;
                let top = self.stack.len().checked_sub(1);
                let other = top
                    .and_then(|top| top.checked_sub(depth))
                    .ok_or(TranscompileError::StackUnderflow { pc })?;
                self.stack.swap(other, other + depth);
            }
            opcode::JUMPDEST => self.pending_gas += gas::JUMPDEST,
            opcode::MSTORE => {
                self.pending_gas += gas::VERYLOW;
                let offset = self.pop(pc)?;
                let value = self.pop(pc)?;
                let offset = self.expand_memory(pc, offset, U256::from(WORD_SIZE))?;
                self.memory[offset..offset + WORD_SIZE]
                    .copy_from_slice(&value.to_be_bytes::<WORD_SIZE>());
            }
            opcode::MSTORE8 => {
                self.pending_gas += gas::VERYLOW;
                let offset = self.pop(pc)?;
                let value = self.pop(pc)?;
                let offset = self.expand_memory(pc, offset, U256::from(1))?;
                self.memory[offset] = value.byte(0);
            }
            opcode::RETURN => {
                let offset = self.pop(pc)?;
                let len = self.pop(pc)?;
                let data = self.read_memory(pc, offset, len)?;
                self.flush_gas();
                let ptr = self.add_segment(pc, data.clone())?;
                self.body.instruction(&Instruction::I32Const(ptr));
                self.body.instruction(&Instruction::I32Const(data.len() as i32));
                self.body.instruction(&Instruction::Call(imports::RETURN));
                return Ok(Flow::Stop);
            }
            opcode::LOG0..=opcode::LOG4 => {
                let topic_count = (op - opcode::LOG0) as usize;
                let offset = self.pop(pc)?;
                let len = self.pop(pc)?;
                let topics = (0..topic_count)
                    .map(|_| self.pop(pc).map(B256::from))
                    .collect::<Result<Vec<_>, _>>()?;
                let data = self.read_memory(pc, offset, len)?;
                self.flush_gas();

                let data_len = data.len() as i32;
                let data_ptr = self.add_segment(pc, data)?;
                let mut topic_ptrs = [0i32; 4];
                for (ptr, topic) in topic_ptrs.iter_mut().zip(topics) {
                    *ptr = self.add_segment(pc, topic.to_vec())?;
                }
                self.body.instruction(&Instruction::I32Const(data_ptr));
                self.body.instruction(&Instruction::I32Const(data_len));
                self.body.instruction(&Instruction::I32Const(topic_count as i32));
                for ptr in topic_ptrs {
                    self.body.instruction(&Instruction::I32Const(ptr));
                }
                self.body.instruction(&Instruction::Call(imports::LOG));
            }
            opcode::SELFDESTRUCT => {
                self.pending_gas += gas::SELFDESTRUCT;
                let beneficiary = Address::from_word(B256::from(self.pop(pc)?));
                self.flush_gas();
                let ptr = self.add_segment(pc, beneficiary.to_vec())?;
                self.body.instruction(&Instruction::I32Const(ptr));
                self.body.instruction(&Instruction::Call(imports::SELF_DESTRUCT));
                return Ok(Flow::Stop);
            }
            opcode::INVALID => {
                self.body.instruction(&Instruction::Unreachable);
                self.body.instruction(&Instruction::End);
                self.finished = true;
                return Ok(Flow::Stop);
            }
            _ => {
                let name = OpCode::new(op)
                    .map(|opcode| opcode.to_string())
                    .unwrap_or_else(|| format!("0x{op:02x}"));
                return Err(TranscompileError::UnsupportedOpcode { name, pc });
            }
        }
        Ok(Flow::Continue(pc + 1))
    }

    fn pop(&mut self, pc: usize) -> Result<U256, TranscompileError> {
        self.stack.pop().ok_or(TranscompileError::StackUnderflow { pc })
    }

    fn push(&mut self, pc: usize, value: U256) -> Result<(), TranscompileError> {
        if self.stack.len() >= STACK_LIMIT {
            return Err(TranscompileError::StackOverflow { pc });
        }
        self.stack.push(value);
        Ok(())
    }

    fn binary(
        &mut self,
        pc: usize,
        cost: u64,
        f: impl FnOnce(U256, U256) -> U256,
    ) -> Result<(), TranscompileError> {
        self.pending_gas += cost;
        let a = self.pop(pc)?;
        let b = self.pop(pc)?;
        self.push(pc, f(a, b))
    }

    /// Grows the memory to cover `len` bytes at `offset`, charging the expansion, and returns the
    /// offset. A zero length touches nothing.
    fn expand_memory(
        &mut self,
        pc: usize,
        offset: U256,
        len: U256,
    ) -> Result<usize, TranscompileError> {
        let limit = MAX_TRANSCOMPILED_MEMORY;
        let len = len.saturating_to::<usize>();
        if len == 0 {
            return Ok(0);
        }
        let offset = offset.saturating_to::<usize>();
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= limit)
            .ok_or(TranscompileError::MemoryLimit { pc, limit })?;

        let words = end.div_ceil(WORD_SIZE);
        let current = self.memory.len() / WORD_SIZE;
        if words > current {
            self.pending_gas += memory_cost(words) - memory_cost(current);
            self.memory.resize(words * WORD_SIZE, 0);
        }
        Ok(offset)
    }

    fn read_memory(
        &mut self,
        pc: usize,
        offset: U256,
        len: U256,
    ) -> Result<Vec<u8>, TranscompileError> {
        let offset = self.expand_memory(pc, offset, len)?;
        let len = len.saturating_to::<usize>();
        Ok(self.memory[offset..offset + len].to_vec())
    }

    /// Places `bytes` in a fresh data segment and returns its address in linear memory.
    fn add_segment(&mut self, pc: usize, bytes: Vec<u8>) -> Result<i32, TranscompileError> {
        let limit = MAX_TRANSCOMPILED_SEGMENTS;
        let ptr = self.segment_cursor;
        self.segment_cursor = ptr
            .checked_add(bytes.len().next_multiple_of(WORD_SIZE))
            .filter(|end| *end <= limit)
            .ok_or(TranscompileError::MemoryLimit { pc, limit })?;
        if !bytes.is_empty() {
            self.segments.push((ptr as u32, bytes));
        }
        Ok(ptr as i32)
    }

    fn flush_gas(&mut self) {
        if self.pending_gas > 0 {
            self.body.instruction(&Instruction::I64Const(self.pending_gas as i64));
            self.body.instruction(&Instruction::Call(imports::USE_GAS));
            self.pending_gas = 0;
        }
    }

    fn finish_function(&mut self) {
        if !self.finished {
            self.flush_gas();
            self.body.instruction(&Instruction::End);
            self.finished = true;
        }
    }

    fn encode(self) -> Vec<u8> {
        const NONE: [ValType; 0] = [];

        let mut types = TypeSection::new();
        types.function([ValType::I64], NONE);
        types.function([ValType::I32; 2], NONE);
        types.function([ValType::I32; 7], NONE);
        types.function([ValType::I32], NONE);
        types.function(NONE, NONE);

        let mut capabilities = ImportSection::new();
        capabilities.import(ETHEREUM_MODULE, USE_GAS_FUNCTION, EntityType::Function(0));
        capabilities.import(ETHEREUM_MODULE, "return", EntityType::Function(1));
        capabilities.import(ETHEREUM_MODULE, "log", EntityType::Function(2));
        capabilities.import(ETHEREUM_MODULE, "selfDestruct", EntityType::Function(3));

        let mut functions = FunctionSection::new();
        functions.function(4);

        let mut memories = MemorySection::new();
        let pages = self.segment_cursor.div_ceil(WASM_PAGE_SIZE).max(1);
        memories.memory(MemoryType {
            minimum: pages as u64,
            maximum: None,
            memory64: false,
            shared: false,
        });

        let mut exports = ExportSection::new();
        exports.export(MAIN_EXPORT, ExportKind::Func, imports::MAIN);
        exports.export(MEMORY_EXPORT, ExportKind::Memory, 0);

        let mut code = CodeSection::new();
        code.function(&self.body);

        let mut data = DataSection::new();
        for (offset, bytes) in &self.segments {
            data.active(0, &ConstExpr::i32_const(*offset as i32), bytes.iter().copied());
        }

        let mut module = Module::new();
        module
            .section(&types)
            .section(&capabilities)
            .section(&functions)
            .section(&memories)
            .section(&exports)
            .section(&code)
            .section(&data);
        module.finish()
    }
}

/// The total gas of an EVM memory of `words` words.
const fn memory_cost(words: usize) -> u64 {
    let words = words as u64;
    gas::MEMORY * words + words * words / 512
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{constants::sandbox::WASM_MAGIC, test_utils::BytecodeBuilder};

    #[test]
    fn test_transcompiled_module_is_valid() {
        let code = BytecodeBuilder::default()
            .append_many([opcode::PUSH1, 0x2a, opcode::PUSH1, 0, opcode::MSTORE])
            .append_many([opcode::PUSH1, 32, opcode::PUSH1, 0, opcode::RETURN])
            .build();
        let module = transcompile(&code).unwrap();
        assert_eq!(module[..4], WASM_MAGIC);
        wasmparser::validate(&module).unwrap();
    }

    #[test]
    fn test_empty_code_is_valid() {
        let module = transcompile(&[]).unwrap();
        wasmparser::validate(&module).unwrap();
    }

    #[test]
    fn test_unsupported_opcode() {
        let code = BytecodeBuilder::default().append_many([opcode::PUSH1, 0, opcode::JUMP]).build();
        let err = transcompile(&code).unwrap_err();
        assert_eq!(err, TranscompileError::UnsupportedOpcode { name: "JUMP".to_string(), pc: 2 });
    }

    #[test]
    fn test_stack_underflow() {
        let code = BytecodeBuilder::default().append_many([opcode::PUSH1, 1, opcode::ADD]).build();
        assert_eq!(transcompile(&code).unwrap_err(), TranscompileError::StackUnderflow { pc: 2 });
    }

    #[test]
    fn test_memory_limit() {
        let code = BytecodeBuilder::default()
            .append_many([opcode::PUSH1, 1])
            .push_number(MAX_TRANSCOMPILED_MEMORY as u64)
            .append(opcode::MSTORE8)
            .build();
        assert!(matches!(
            transcompile(&code).unwrap_err(),
            TranscompileError::MemoryLimit { pc: 11, .. }
        ));
    }

    #[test]
    fn test_segment_limit() {
        let logs = MAX_TRANSCOMPILED_SEGMENTS / MAX_TRANSCOMPILED_MEMORY;
        // Each LOG0 snapshots the whole translated memory into its own segment.
        let log_memory = |count: usize| {
            let len = (MAX_TRANSCOMPILED_MEMORY as u16).to_be_bytes();
            (0..count)
                .fold(BytecodeBuilder::default(), |builder, _| {
                    builder.push_bytes(len).append_many([opcode::PUSH0, opcode::LOG0])
                })
                .build()
        };

        let module = transcompile(&log_memory(logs)).unwrap();
        wasmparser::validate(&module).unwrap();

        assert_eq!(
            transcompile(&log_memory(logs + 1)).unwrap_err(),
            TranscompileError::MemoryLimit { pc: logs * 5 + 4, limit: MAX_TRANSCOMPILED_SEGMENTS }
        );
    }

    #[test]
    fn test_precompile_output_is_status_prefixed() {
        let call = Call::default().with_data(vec![opcode::STOP]);
        let output = Transcompiler.run(&call, &State::default()).unwrap();
        assert_eq!(output[0], TRANSCOMPILE_SUCCESS);
        assert_eq!(output[1..5], WASM_MAGIC);

        let call = Call::default().with_data(vec![opcode::CALLDATALOAD]);
        let output = Transcompiler.run(&call, &State::default()).unwrap();
        assert_eq!(output[0], TRANSCOMPILE_FAILURE);
        assert_eq!(&output[1..], b"unsupported opcode CALLDATALOAD at pc=0");
    }

    #[test]
    fn test_memory_cost() {
        assert_eq!(memory_cost(0), 0);
        assert_eq!(memory_cost(1), 3);
        assert_eq!(memory_cost(32), 98);
    }
}
