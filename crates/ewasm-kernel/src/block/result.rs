use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::{CallResult, Log, TransactionError};

/// The outcome of an applied transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_more::Deref)]
pub struct TransactionOutcome {
    /// The result of the top-level call.
    #[deref]
    pub result: CallResult,
    /// The gas consumed, `gas_limit - gas_left`.
    pub gas_used: u64,
    /// The amount credited back to the sender for unused gas and refunds.
    pub refund: U256,
}

/// The outcome of a block: one entry per transaction, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockOutcome {
    /// Applied transactions and rejections.
    pub transactions: Vec<Result<TransactionOutcome, TransactionError>>,
}

impl BlockOutcome {
    /// Total gas consumed by the applied transactions.
    pub fn gas_used(&self) -> u64 {
        self.applied().map(|outcome| outcome.gas_used).sum()
    }

    /// The logs of the successful transactions, in order.
    pub fn logs(&self) -> impl Iterator<Item = &Log> {
        self.applied().filter(|outcome| outcome.is_success()).flat_map(|outcome| &outcome.logs)
    }

    /// The applied transactions, successful or failed.
    pub fn applied(&self) -> impl Iterator<Item = &TransactionOutcome> {
        self.transactions.iter().filter_map(|tx| tx.as_ref().ok())
    }

    /// The number of rejected transactions.
    pub fn rejected(&self) -> usize {
        self.transactions.iter().filter(|tx| tx.is_err()).count()
    }
}
