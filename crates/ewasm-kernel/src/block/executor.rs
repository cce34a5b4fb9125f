use alloy_primitives::U256;
use tracing::{debug, warn};

use crate::{
    AcceptAll, Block, BlockOutcome, Kernel, State, Transaction, TransactionError,
    TransactionOutcome, TransactionValidator,
};

/// Applies transactions and blocks through a [`Kernel`].
///
/// For every transaction the sender buys `gas_limit * gas_price` worth of gas up front. The
/// purchase is irreversible: a failed call keeps it. A successful call refunds
/// `(gas_left + gas_refund) * gas_price` to the sender.
#[derive(Clone, Debug)]
pub struct BlockRunner<V = AcceptAll> {
    kernel: Kernel,
    validator: V,
}

impl Default for BlockRunner {
    fn default() -> Self {
        Self::new(Kernel::default())
    }
}

impl BlockRunner {
    /// Creates a runner that accepts every transaction.
    pub const fn new(kernel: Kernel) -> Self {
        Self { kernel, validator: AcceptAll }
    }
}

impl<V: TransactionValidator> BlockRunner<V> {
    /// Replaces the transaction validator.
    pub fn with_validator<W: TransactionValidator>(self, validator: W) -> BlockRunner<W> {
        BlockRunner { kernel: self.kernel, validator }
    }

    /// Returns the kernel.
    pub const fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Applies a single transaction to `state`.
    ///
    /// A rejected transaction leaves `state` untouched.
    pub fn run_transaction(
        &self,
        tx: &Transaction,
        state: &mut State,
    ) -> Result<TransactionOutcome, TransactionError> {
        self.validator.validate(tx, state)?;

        let balance = state
            .balance(&tx.from)
            .ok_or(TransactionError::SenderNotFound(tx.from))?;
        let cost = match tx.gas_cost() {
            Some(cost) if cost <= balance => cost,
            _ => return Err(TransactionError::insufficient_balance(tx, balance)),
        };

        state
            .debit(tx.from, cost)
            .map_err(|_| TransactionError::insufficient_balance(tx, balance))?;

        let result = self.kernel.execute(&tx.to_call(), state);

        let refund = if result.is_success() {
            U256::from(result.gas_left.saturating_add(result.gas_refund))
                .saturating_mul(tx.gas_price)
        } else {
            U256::ZERO
        };
        if !refund.is_zero() {
            state.credit(tx.from, refund);
        }

        let gas_used = tx.gas_limit.saturating_sub(result.gas_left);
        debug!(
            target: "ewasm::block",
            from = %tx.from,
            to = %tx.to,
            success = result.is_success(),
            gas_used,
            %refund,
            "Applied transaction"
        );
        Ok(TransactionOutcome { result, gas_used, refund })
    }

    /// Applies the transactions of `block` in order against `state`.
    pub fn run_block(&self, block: &Block, state: &mut State) -> BlockOutcome {
        let transactions = block
            .transactions
            .iter()
            .enumerate()
            .map(|(index, tx)| {
                self.run_transaction(tx, state).inspect_err(|error| {
                    warn!(target: "ewasm::block", index, %error, "Rejected transaction");
                })
            })
            .collect();
        BlockOutcome { transactions }
    }
}
