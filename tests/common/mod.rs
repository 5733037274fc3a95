use std::sync::Arc;
use anyhow::Result;
use once_cell::sync::Lazy;
use tempfile::NamedTempFile;

use ferrodb::storage::buffer::BufferPoolManager;

static LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

// Initialize test logging exactly once
#[allow(dead_code)]
pub fn init_logging() {
    Lazy::force(&LOGGER);
}

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<NamedTempFile> {
    Ok(NamedTempFile::new()?)
}

// Create a buffer pool manager over a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(
    pool_size: usize,
    replacer_k: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    init_logging();
    let file = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, replacer_k, file.path())?);
    Ok((buffer_pool, file))
}
