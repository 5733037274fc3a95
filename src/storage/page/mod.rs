pub mod header;

pub use header::{HeaderPage, HeaderPageError};
