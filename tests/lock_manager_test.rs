use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use anyhow::Result;

use ferrodb::common::types::Rid;
use ferrodb::transaction::concurrency::{LockManager, LockManagerConfig, LockMode};
use ferrodb::transaction::{
    AbortReason, IsolationLevel, TransactionManager, TransactionState,
};

mod common;
use common::init_logging;

const TABLE: u32 = 1;

fn setup() -> (Arc<LockManager>, Arc<TransactionManager>) {
    init_logging();
    let lock_manager = Arc::new(LockManager::new(LockManagerConfig::default()));
    let txn_manager = Arc::new(TransactionManager::new(lock_manager.clone()));
    (lock_manager, txn_manager)
}

#[test]
fn test_shared_locks_coexist_exclusive_waits() -> Result<()> {
    let (lm, tm) = setup();

    let txn_a = tm.begin(IsolationLevel::RepeatableRead);
    let txn_b = tm.begin(IsolationLevel::RepeatableRead);
    let txn_c = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn_a, LockMode::Shared, TABLE)?);
    assert!(lm.lock_table(&txn_b, LockMode::Shared, TABLE)?);

    // C's exclusive request must wait behind both shared holders
    let granted = Arc::new(AtomicBool::new(false));
    let waiter = {
        let lm = lm.clone();
        let txn_c = txn_c.clone();
        let granted = granted.clone();
        thread::spawn(move || {
            let ok = lm.lock_table(&txn_c, LockMode::Exclusive, TABLE).unwrap();
            granted.store(true, Ordering::SeqCst);
            ok
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!granted.load(Ordering::SeqCst), "X granted alongside S");

    // Releasing both shared locks unblocks the exclusive waiter
    tm.commit(&txn_a)?;
    thread::sleep(Duration::from_millis(50));
    assert!(!granted.load(Ordering::SeqCst), "X granted with S still held");
    tm.commit(&txn_b)?;

    assert!(waiter.join().unwrap());
    assert!(granted.load(Ordering::SeqCst));
    tm.commit(&txn_c)?;
    Ok(())
}

#[test]
fn test_intention_modes_coexist() -> Result<()> {
    let (lm, tm) = setup();
    let txn_a = tm.begin(IsolationLevel::RepeatableRead);
    let txn_b = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn_a, LockMode::IntentionShared, TABLE)?);
    assert!(lm.lock_table(&txn_b, LockMode::IntentionExclusive, TABLE)?);

    tm.commit(&txn_a)?;
    tm.commit(&txn_b)?;
    Ok(())
}

#[test]
fn test_fifo_no_queue_jumping() -> Result<()> {
    let (lm, tm) = setup();
    let txn_a = tm.begin(IsolationLevel::RepeatableRead);
    let txn_b = tm.begin(IsolationLevel::RepeatableRead);
    let txn_c = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn_a, LockMode::Shared, TABLE)?);

    // B requests X: incompatible, waits
    let b_granted = Arc::new(AtomicBool::new(false));
    let b_thread = {
        let (lm, txn_b, flag) = (lm.clone(), txn_b.clone(), b_granted.clone());
        thread::spawn(move || {
            let ok = lm.lock_table(&txn_b, LockMode::Exclusive, TABLE).unwrap();
            flag.store(true, Ordering::SeqCst);
            ok
        })
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!b_granted.load(Ordering::SeqCst));

    // C requests S: compatible with A's grant, but it may not jump the
    // earlier conflicting request from B
    let c_granted = Arc::new(AtomicBool::new(false));
    let c_thread = {
        let (lm, txn_c, flag) = (lm.clone(), txn_c.clone(), c_granted.clone());
        thread::spawn(move || {
            let ok = lm.lock_table(&txn_c, LockMode::Shared, TABLE).unwrap();
            flag.store(true, Ordering::SeqCst);
            ok
        })
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!c_granted.load(Ordering::SeqCst), "S jumped the FIFO queue");

    tm.commit(&txn_a)?;
    assert!(b_thread.join().unwrap());

    tm.commit(&txn_b)?;
    assert!(c_thread.join().unwrap());
    tm.commit(&txn_c)?;
    Ok(())
}

#[test]
fn test_same_mode_re_request_is_idempotent() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Shared, TABLE)?);
    assert!(lm.lock_table(&txn, LockMode::Shared, TABLE)?);
    assert!(txn.is_table_locked(TABLE, LockMode::Shared));

    tm.commit(&txn)?;
    Ok(())
}

#[test]
fn test_uncontended_upgrade() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Shared, TABLE)?);
    assert!(lm.lock_table(&txn, LockMode::Exclusive, TABLE)?);

    assert!(txn.is_table_locked(TABLE, LockMode::Exclusive));
    assert!(!txn.is_table_locked(TABLE, LockMode::Shared));

    tm.commit(&txn)?;
    Ok(())
}

#[test]
fn test_upgrade_conflict_aborts_second_upgrader() -> Result<()> {
    let (lm, tm) = setup();
    let txn_a = tm.begin(IsolationLevel::RepeatableRead);
    let txn_b = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn_a, LockMode::Shared, TABLE)?);
    assert!(lm.lock_table(&txn_b, LockMode::Shared, TABLE)?);

    // A starts upgrading; it must wait for B's shared lock to go away
    let a_thread = {
        let (lm, txn_a) = (lm.clone(), txn_a.clone());
        thread::spawn(move || lm.lock_table(&txn_a, LockMode::Exclusive, TABLE).unwrap())
    };
    thread::sleep(Duration::from_millis(50));

    // B's competing upgrade hits the occupied upgrade slot
    let err = lm
        .lock_table(&txn_b, LockMode::Exclusive, TABLE)
        .unwrap_err();
    assert_eq!(err.reason, AbortReason::UpgradeConflict);
    assert_eq!(txn_b.state(), TransactionState::Aborted);

    // Aborting B releases its shared lock; A's upgrade completes
    tm.abort(&txn_b)?;
    assert!(a_thread.join().unwrap());
    assert!(txn_a.is_table_locked(TABLE, LockMode::Exclusive));
    tm.commit(&txn_a)?;
    Ok(())
}

#[test]
fn test_incompatible_upgrade_aborts() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Exclusive, TABLE)?);
    let err = lm.lock_table(&txn, LockMode::Shared, TABLE).unwrap_err();
    assert_eq!(err.reason, AbortReason::IncompatibleUpgrade);
    assert_eq!(txn.state(), TransactionState::Aborted);

    tm.abort(&txn)?;
    Ok(())
}

#[test]
fn test_row_lock_requires_table_lock() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 1);

    // X row without any table lock
    let err = lm
        .lock_row(&txn, LockMode::Exclusive, TABLE, rid)
        .unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);
    assert_eq!(txn.state(), TransactionState::Aborted);
    tm.abort(&txn)?;

    // IX on the table makes the X row lock legal
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&txn, LockMode::IntentionExclusive, TABLE)?);
    assert!(lm.lock_row(&txn, LockMode::Exclusive, TABLE, rid)?);
    assert!(txn.is_row_locked(TABLE, rid, LockMode::Exclusive));

    // The table lock cannot be released while the row lock is held
    let err = lm.unlock_table(&txn, TABLE).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);
    tm.abort(&txn)?;
    Ok(())
}

#[test]
fn test_intention_lock_on_row_rejected() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 2);

    let err = lm
        .lock_row(&txn, LockMode::IntentionShared, TABLE, rid)
        .unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedIntentionLockOnRow);
    assert_eq!(txn.state(), TransactionState::Aborted);

    tm.abort(&txn)?;
    Ok(())
}

#[test]
fn test_unlock_without_lock_aborts() -> Result<()> {
    let (lm, tm) = setup();
    let txn_a = tm.begin(IsolationLevel::RepeatableRead);
    let txn_b = tm.begin(IsolationLevel::RepeatableRead);

    // B creates the queue, then A tries to unlock a lock it never took
    assert!(lm.lock_table(&txn_b, LockMode::Shared, TABLE)?);
    let err = lm.unlock_table(&txn_a, TABLE).unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedUnlockButNoLockHeld);
    assert_eq!(txn_a.state(), TransactionState::Aborted);

    tm.abort(&txn_a)?;
    tm.commit(&txn_b)?;
    Ok(())
}

#[test]
fn test_read_uncommitted_forbids_shared() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::ReadUncommitted);

    let err = lm.lock_table(&txn, LockMode::Shared, TABLE).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockSharedOnReadUncommitted);
    assert_eq!(txn.state(), TransactionState::Aborted);
    tm.abort(&txn)?;

    // Exclusive locking is still allowed under read uncommitted
    let txn = tm.begin(IsolationLevel::ReadUncommitted);
    assert!(lm.lock_table(&txn, LockMode::Exclusive, TABLE)?);
    tm.commit(&txn)?;
    Ok(())
}

#[test]
fn test_read_committed_allows_shared_while_shrinking() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::ReadCommitted);

    // Releasing X enters the shrinking phase
    assert!(lm.lock_table(&txn, LockMode::Exclusive, TABLE)?);
    lm.unlock_table(&txn, TABLE)?;
    assert_eq!(txn.state(), TransactionState::Shrinking);

    // S and IS are still acquirable; anything else is not
    assert!(lm.lock_table(&txn, LockMode::IntentionShared, TABLE)?);
    assert!(lm.lock_table(&txn, LockMode::Shared, TABLE)?);
    let err = lm
        .lock_table(&txn, LockMode::IntentionExclusive, 2)
        .unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);

    tm.abort(&txn)?;
    Ok(())
}

#[test]
fn test_repeatable_read_shrinks_on_shared_release() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Shared, TABLE)?);
    lm.unlock_table(&txn, TABLE)?;
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let err = lm.lock_table(&txn, LockMode::Shared, TABLE).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);
    tm.abort(&txn)?;

    // Read committed does not shrink on S release
    let txn = tm.begin(IsolationLevel::ReadCommitted);
    assert!(lm.lock_table(&txn, LockMode::Shared, TABLE)?);
    lm.unlock_table(&txn, TABLE)?;
    assert_eq!(txn.state(), TransactionState::Growing);
    tm.commit(&txn)?;
    Ok(())
}

#[test]
fn test_deadlock_victim_is_youngest() -> Result<()> {
    init_logging();
    let lock_manager = Arc::new(LockManager::new(LockManagerConfig {
        detection_interval: Duration::from_millis(10),
    }));
    let txn_manager = Arc::new(TransactionManager::new(lock_manager.clone()));
    lock_manager.start_deadlock_detection(&txn_manager);

    let txn_1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let txn_2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let r1 = Rid::new(1, 1);
    let r2 = Rid::new(1, 2);

    assert!(lock_manager.lock_table(&txn_1, LockMode::IntentionExclusive, TABLE)?);
    assert!(lock_manager.lock_table(&txn_2, LockMode::IntentionExclusive, TABLE)?);
    assert!(lock_manager.lock_row(&txn_1, LockMode::Exclusive, TABLE, r1)?);
    assert!(lock_manager.lock_row(&txn_2, LockMode::Exclusive, TABLE, r2)?);

    // txn 1 wants r2, txn 2 wants r1: a two-cycle the detector must
    // break by aborting the larger transaction id
    let t1 = {
        let (lm, txn_1) = (lock_manager.clone(), txn_1.clone());
        thread::spawn(move || lm.lock_row(&txn_1, LockMode::Exclusive, TABLE, r2).unwrap())
    };
    let t2 = {
        let (lm, txn_2) = (lock_manager.clone(), txn_2.clone());
        thread::spawn(move || lm.lock_row(&txn_2, LockMode::Exclusive, TABLE, r1).unwrap())
    };

    // The victim's waiting call reports failure without raising; the
    // survivor is granted
    assert!(t1.join().unwrap(), "older transaction should survive");
    assert!(!t2.join().unwrap(), "younger transaction should be victim");
    assert_eq!(txn_2.state(), TransactionState::Aborted);
    assert_eq!(txn_1.state(), TransactionState::Growing);

    txn_manager.abort(&txn_2)?;
    txn_manager.commit(&txn_1)?;
    lock_manager.stop_deadlock_detection();
    Ok(())
}
