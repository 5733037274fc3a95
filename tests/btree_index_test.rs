use std::collections::BTreeMap;
use std::sync::Arc;
use anyhow::Result;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use ferrodb::common::types::{Rid, INVALID_PAGE_ID};
use ferrodb::index::btree::page::tree_page::{self, IndexPageType};
use ferrodb::index::btree::{BPlusTreeIndex, GenericKey};

mod common;
use common::create_test_buffer_pool;

type Key = GenericKey<8>;

fn key(v: u64) -> Key {
    Key::from_u64(v)
}

fn rid(v: u64) -> Rid {
    Rid::new((v / 100) as u32, (v % 100) as u32)
}

fn collect_keys(index: &BPlusTreeIndex<8>) -> Result<Vec<u64>> {
    Ok(index.begin()?.map(|(k, _)| k.to_u64()).collect())
}

#[test]
fn test_empty_tree() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(20, 2)?;
    let index = BPlusTreeIndex::<8>::new("empty", buffer_pool, 3, 3)?;

    assert!(index.is_empty());
    assert_eq!(index.get_root_page_id(), INVALID_PAGE_ID);
    assert!(index.get_value(&key(1))?.is_empty());
    assert_eq!(index.begin()?.count(), 0);
    assert_eq!(index.end().count(), 0);
    Ok(())
}

#[test]
fn test_sequential_insert_and_iterate() -> Result<()> {
    // leaf max 3, internal max 3: five inserts force splits at both
    // levels
    let (buffer_pool, _temp_file) = create_test_buffer_pool(20, 2)?;
    let index = BPlusTreeIndex::<8>::new("seq", buffer_pool, 3, 3)?;

    for v in 1..=5 {
        assert!(index.insert(&key(v), rid(v))?);
    }
    assert!(!index.is_empty());
    assert_eq!(collect_keys(&index)?, vec![1, 2, 3, 4, 5]);

    for v in 1..=5 {
        assert_eq!(index.get_value(&key(v))?, vec![rid(v)]);
    }
    assert!(index.get_value(&key(6))?.is_empty());

    index.remove(&key(1))?;
    index.remove(&key(5))?;
    assert_eq!(collect_keys(&index)?, vec![2, 3, 4]);
    assert!(index.get_value(&key(1))?.is_empty());
    Ok(())
}

#[test]
fn test_merge_down_to_single_leaf() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(20, 2)?;
    let index = BPlusTreeIndex::<8>::new("merge", buffer_pool.clone(), 3, 3)?;

    for v in 1..=5 {
        index.insert(&key(v), rid(v))?;
    }
    for v in [1, 3, 4, 5] {
        index.remove(&key(v))?;
    }

    assert_eq!(collect_keys(&index)?, vec![2]);
    assert_eq!(index.get_value(&key(2))?, vec![rid(2)]);

    // The root shrank back to a valid leaf
    let root_id = index.get_root_page_id();
    assert_ne!(root_id, INVALID_PAGE_ID);
    let root = buffer_pool.fetch_page(root_id)?;
    {
        let guard = root.read();
        assert_eq!(tree_page::page_type(&guard), Some(IndexPageType::Leaf));
    }
    buffer_pool.unpin_page(root_id, false)?;
    Ok(())
}

#[test]
fn test_duplicate_insert_rejected() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(20, 2)?;
    let index = BPlusTreeIndex::<8>::new("dup", buffer_pool, 3, 3)?;

    assert!(index.insert(&key(7), rid(7))?);
    assert!(!index.insert(&key(7), rid(99))?);
    assert_eq!(index.get_value(&key(7))?, vec![rid(7)]);

    // Delete then re-insert succeeds
    index.remove(&key(7))?;
    assert!(index.get_value(&key(7))?.is_empty());
    assert!(index.insert(&key(7), rid(8))?);
    assert_eq!(index.get_value(&key(7))?, vec![rid(8)]);
    Ok(())
}

#[test]
fn test_remove_until_empty_then_reuse() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(30, 2)?;
    let index = BPlusTreeIndex::<8>::new("drain", buffer_pool, 3, 3)?;

    for v in 1..=10 {
        index.insert(&key(v), rid(v))?;
    }
    for v in 1..=10 {
        index.remove(&key(v))?;
    }
    assert!(index.is_empty());
    assert_eq!(index.get_root_page_id(), INVALID_PAGE_ID);

    // Removing from an empty tree is harmless; inserting restarts it
    index.remove(&key(1))?;
    assert!(index.insert(&key(42), rid(42))?);
    assert_eq!(collect_keys(&index)?, vec![42]);
    Ok(())
}

#[test]
fn test_begin_at_mid_key() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(30, 2)?;
    let index = BPlusTreeIndex::<8>::new("scan", buffer_pool, 4, 4)?;

    for v in (2..=20).step_by(2) {
        index.insert(&key(v), rid(v))?;
    }

    // Present key starts at itself
    let keys: Vec<u64> = index.begin_at(&key(8))?.map(|(k, _)| k.to_u64()).collect();
    assert_eq!(keys, vec![8, 10, 12, 14, 16, 18, 20]);

    // Absent key starts at the next larger one
    let keys: Vec<u64> = index.begin_at(&key(9))?.map(|(k, _)| k.to_u64()).collect();
    assert_eq!(keys, vec![10, 12, 14, 16, 18, 20]);

    // Past the end yields nothing
    assert_eq!(index.begin_at(&key(21))?.count(), 0);
    Ok(())
}

#[test]
fn test_randomized_against_oracle() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(128, 2)?;
    let index = BPlusTreeIndex::<8>::new("random", buffer_pool, 4, 4)?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xB7EE);

    let mut values: Vec<u64> = (0..300).collect();
    values.shuffle(&mut rng);

    let mut oracle = BTreeMap::new();
    for &v in &values {
        assert!(index.insert(&key(v), rid(v))?);
        oracle.insert(v, rid(v));
    }

    let expected: Vec<u64> = oracle.keys().copied().collect();
    assert_eq!(collect_keys(&index)?, expected);

    // Remove a random half and re-verify both membership and order
    values.shuffle(&mut rng);
    for &v in values.iter().take(150) {
        index.remove(&key(v))?;
        oracle.remove(&v);
    }

    let expected: Vec<u64> = oracle.keys().copied().collect();
    assert_eq!(collect_keys(&index)?, expected);
    for v in 0..300 {
        let found = index.get_value(&key(v))?;
        match oracle.get(&v) {
            Some(r) => assert_eq!(found, vec![*r]),
            None => assert!(found.is_empty()),
        }
    }
    Ok(())
}

#[test]
fn test_root_survives_reopen() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(30, 2)?;

    {
        let index = BPlusTreeIndex::<8>::new("reopened", buffer_pool.clone(), 4, 4)?;
        for v in 1..=20 {
            index.insert(&key(v), rid(v))?;
        }
    }

    // A fresh handle re-finds its root through the header page
    let index = BPlusTreeIndex::<8>::new("reopened", buffer_pool, 4, 4)?;
    assert!(!index.is_empty());
    assert_eq!(collect_keys(&index)?.len(), 20);
    assert_eq!(index.get_value(&key(13))?, vec![rid(13)]);
    Ok(())
}

#[test]
fn test_concurrent_readers() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(128, 2)?;
    let index = Arc::new(BPlusTreeIndex::<8>::new("readers", buffer_pool, 4, 4)?);

    for v in 0..200 {
        index.insert(&key(v), rid(v))?;
    }

    let mut handles = Vec::new();
    for t in 0..4 {
        let index = Arc::clone(&index);
        handles.push(std::thread::spawn(move || {
            for v in (t..200).step_by(4) {
                let found = index.get_value(&key(v)).unwrap();
                assert_eq!(found, vec![rid(v)]);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    Ok(())
}

#[test]
fn test_concurrent_writers_disjoint_ranges() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(256, 2)?;
    let index = Arc::new(BPlusTreeIndex::<8>::new("writers", buffer_pool, 8, 8)?);

    let mut handles = Vec::new();
    for t in 0..4u64 {
        let index = Arc::clone(&index);
        handles.push(std::thread::spawn(move || {
            for v in (t * 100)..(t * 100 + 100) {
                assert!(index.insert(&key(v), rid(v)).unwrap());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(collect_keys(&index)?, (0..400).collect::<Vec<u64>>());
    for v in 0..400 {
        assert_eq!(index.get_value(&key(v))?, vec![rid(v)]);
    }
    Ok(())
}
