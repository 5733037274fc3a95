use thiserror::Error;
use crate::storage::buffer::BufferPoolError;
use crate::storage::page::HeaderPageError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Invalid page format")]
    InvalidPageFormat,

    #[error("Key size {0} does not fit a page with max size {1}")]
    PageOverflow(usize, usize),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),

    #[error("Header page error: {0}")]
    HeaderPageError(#[from] HeaderPageError),
}
