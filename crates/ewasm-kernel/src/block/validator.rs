use auto_impl::auto_impl;

use crate::{State, Transaction, TransactionError};

/// Decides whether a transaction may be applied, before any state is touched.
///
/// Signature recovery and nonce policy live outside the kernel; they plug in here.
#[auto_impl(&, Box, Rc, Arc)]
pub trait TransactionValidator {
    /// Returns an error if `tx` must be rejected.
    fn validate(&self, tx: &Transaction, state: &State) -> Result<(), TransactionError>;
}

/// Accepts every transaction.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl TransactionValidator for AcceptAll {
    fn validate(&self, _tx: &Transaction, _state: &State) -> Result<(), TransactionError> {
        Ok(())
    }
}
