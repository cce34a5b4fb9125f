//! Transaction and block execution on top of the [`Kernel`](crate::Kernel).
//!
//! # Architecture
//!
//! - **`TransactionValidator`**: external validity check run before a transaction touches state
//! - **`BlockRunner`**: buys gas for each transaction, dispatches it through the kernel and
//!   refunds unused gas
//!
//! A block applies its transactions strictly in order against one evolving state. A rejected
//! transaction is recorded and the block moves on; there is no partial-block rollback.

mod executor;
mod result;
mod validator;

pub use executor::*;
pub use result::*;
pub use validator::*;
