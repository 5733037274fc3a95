// Export public modules
pub mod common;
pub mod container;
pub mod storage;
pub mod index;
pub mod catalog;
pub mod transaction;

// Re-export key items for convenient access
pub use storage::buffer::BufferPoolManager;
pub use storage::buffer::BufferPoolError;
pub use index::btree::BPlusTreeIndex;
pub use transaction::{Transaction, TransactionManager, IsolationLevel};
pub use transaction::concurrency::LockManager;
