//! Assembles legacy EVM bytecode for the transcompiler tests.

use alloy_primitives::{Address, Bytes, B256};
use revm::bytecode::opcode::{LOG0, MSTORE, PUSH0, RETURN, SELFDESTRUCT};

/// Pads `bytes` with zeros on the right up to a multiple of `multiple_of`.
pub fn right_pad_bytes(bytes: impl AsRef<[u8]>, multiple_of: usize) -> Vec<u8> {
    let mut padded = bytes.as_ref().to_vec();
    padded.resize(padded.len().next_multiple_of(multiple_of), 0);
    padded
}

/// A builder of legacy EVM bytecode restricted to what the transcompiler folds.
#[derive(Debug, Default)]
pub struct BytecodeBuilder {
    code: Vec<u8>,
}

impl BytecodeBuilder {
    /// Returns the assembled bytecode.
    pub fn build(self) -> Bytes {
        self.code.into()
    }

    /// Appends one opcode.
    pub fn append(mut self, opcode: u8) -> Self {
        self.code.push(opcode);
        self
    }

    /// Appends raw opcodes and immediates.
    pub fn append_many(mut self, items: impl IntoIterator<Item = u8>) -> Self {
        self.code.extend(items);
        self
    }

    /// Appends the shortest `PUSHn` carrying `bytes` verbatim; empty input becomes `PUSH0`.
    pub fn push_bytes(mut self, bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        assert!(bytes.len() <= 32, "a push carries at most 32 bytes");
        self.code.push(PUSH0 + bytes.len() as u8);
        self.code.extend_from_slice(bytes);
        self
    }

    /// Appends a push of `number` as a full 8-byte immediate.
    pub fn push_number(self, number: u64) -> Self {
        self.push_bytes(number.to_be_bytes())
    }

    /// Appends a `PUSH20` of `address`.
    pub fn push_address(self, address: Address) -> Self {
        self.push_bytes(address)
    }

    /// Writes `bytes` to memory at `offset`, one padded word per `MSTORE`.
    pub fn mstore(mut self, offset: usize, bytes: impl AsRef<[u8]>) -> Self {
        for (index, word) in right_pad_bytes(bytes, 32).chunks(32).enumerate() {
            self = self.push_bytes(word).push_number((offset + index * 32) as u64).append(MSTORE);
        }
        self
    }

    /// Emits a log of `data` with `topics`, staging the data at memory offset zero.
    pub fn log(mut self, topics: &[B256], data: impl AsRef<[u8]>) -> Self {
        assert!(topics.len() <= 4, "a log carries at most four topics");
        let len = data.as_ref().len() as u64;
        self = self.mstore(0, data);
        for topic in topics.iter().rev() {
            self = self.push_bytes(topic);
        }
        self.push_number(len).push_number(0).append(LOG0 + topics.len() as u8)
    }

    /// Returns with empty output.
    pub fn return_empty(self) -> Self {
        self.append_many([PUSH0, PUSH0, RETURN])
    }

    /// Returns `data`, staging it at memory offset zero.
    pub fn return_with_data(self, data: impl AsRef<[u8]>) -> Self {
        let len = data.as_ref().len() as u64;
        self.mstore(0, data).push_number(len).push_number(0).append(RETURN)
    }

    /// Self-destructs in favor of `beneficiary`.
    pub fn self_destruct(self, beneficiary: Address) -> Self {
        self.push_address(beneficiary).append(SELFDESTRUCT)
    }
}
