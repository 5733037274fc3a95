pub mod error;
pub mod key;
pub mod page;
pub mod index;

mod latch;

pub use error::BTreeError;
pub use key::GenericKey;
pub use index::BPlusTreeIndex;
pub use index::iterator::IndexIterator;
