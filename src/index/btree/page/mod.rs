pub mod tree_page;
pub mod leaf_page;
pub mod internal_page;

pub use tree_page::{BTreePageHeader, IndexPageType, TREE_PAGE_HEADER_SIZE};
pub use leaf_page::{LeafPage, LEAF_PAGE_HEADER_SIZE};
pub use internal_page::InternalPage;
