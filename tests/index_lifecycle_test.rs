use std::sync::Arc;
use anyhow::Result;

use ferrodb::catalog::Catalog;
use ferrodb::common::types::Rid;
use ferrodb::index::btree::{BPlusTreeIndex, GenericKey};
use ferrodb::transaction::concurrency::{LockManager, LockManagerConfig, LockMode};
use ferrodb::transaction::{IsolationLevel, TransactionManager};

mod common;
use common::create_test_buffer_pool;

/// An executor-shaped walk through the core: register a table and its
/// index in the catalog, lock hierarchically, write through the index,
/// then read back under a shared lock.
#[test]
fn test_insert_then_read_under_locks() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64, 2)?;
    let catalog = Catalog::new();
    let lock_manager = Arc::new(LockManager::new(LockManagerConfig::default()));
    let txn_manager = Arc::new(TransactionManager::new(lock_manager.clone()));

    let table_oid = catalog.create_table("accounts").unwrap();
    let index_info = catalog.create_index("accounts_pk", "accounts", 8).unwrap();
    assert_eq!(index_info.table_oid, table_oid);
    assert_eq!(catalog.get_table_indexes("accounts").len(), 1);

    let index = BPlusTreeIndex::<8>::new(
        index_info.name.clone(),
        buffer_pool.clone(),
        4,
        4,
    )?;

    // Writer: IX on the table, X on each row it inserts
    let writer = txn_manager.begin(IsolationLevel::RepeatableRead);
    assert!(lock_manager.lock_table(&writer, LockMode::IntentionExclusive, table_oid)?);
    for v in 1..=50u64 {
        let rid = Rid::new(1, v as u32);
        assert!(lock_manager.lock_row(&writer, LockMode::Exclusive, table_oid, rid)?);
        assert!(index.insert(&GenericKey::from_u64(v), rid)?);
    }
    txn_manager.commit(&writer)?;

    // Reader: S on the table is enough for point lookups
    let reader = txn_manager.begin(IsolationLevel::ReadCommitted);
    assert!(lock_manager.lock_table(&reader, LockMode::Shared, table_oid)?);
    for v in [1u64, 25, 50] {
        let found = index.get_value(&GenericKey::from_u64(v))?;
        assert_eq!(found, vec![Rid::new(1, v as u32)]);
    }
    let keys: Vec<u64> = index.begin()?.map(|(k, _)| k.to_u64()).collect();
    assert_eq!(keys, (1..=50).collect::<Vec<u64>>());
    txn_manager.commit(&reader)?;

    Ok(())
}
