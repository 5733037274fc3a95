pub mod transaction;
pub mod transaction_manager;
pub mod concurrency;

pub use transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbortError, TransactionState,
};
pub use transaction_manager::TransactionManager;
