use std::collections::{HashMap, HashSet};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Why a transaction was aborted by the lock manager
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("lock requested while in the shrinking phase")]
    LockOnShrinking,

    #[error("shared lock requested under read uncommitted")]
    LockSharedOnReadUncommitted,

    #[error("required table lock not present")]
    TableLockNotPresent,

    #[error("attempted to unlock but no lock held")]
    AttemptedUnlockButNoLockHeld,

    #[error("attempted an intention lock on a row")]
    AttemptedIntentionLockOnRow,

    #[error("another upgrade is already pending on this queue")]
    UpgradeConflict,

    #[error("incompatible lock upgrade")]
    IncompatibleUpgrade,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbortError {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

/// An active database transaction.
///
/// Tracks the 2PL lifecycle state and every lock currently held: one
/// set of table oids per lock mode, plus per-table row id sets for the
/// two row modes. Shared between client threads and the deadlock
/// detector as `Arc<Transaction>`.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,

    shared_table_lock_set: Mutex<HashSet<TableOid>>,
    exclusive_table_lock_set: Mutex<HashSet<TableOid>>,
    intention_shared_table_lock_set: Mutex<HashSet<TableOid>>,
    intention_exclusive_table_lock_set: Mutex<HashSet<TableOid>>,
    shared_intention_exclusive_table_lock_set: Mutex<HashSet<TableOid>>,

    shared_row_lock_set: Mutex<HashMap<TableOid, HashSet<Rid>>>,
    exclusive_row_lock_set: Mutex<HashMap<TableOid, HashSet<Rid>>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            shared_table_lock_set: Mutex::new(HashSet::new()),
            exclusive_table_lock_set: Mutex::new(HashSet::new()),
            intention_shared_table_lock_set: Mutex::new(HashSet::new()),
            intention_exclusive_table_lock_set: Mutex::new(HashSet::new()),
            shared_intention_exclusive_table_lock_set: Mutex::new(HashSet::new()),
            shared_row_lock_set: Mutex::new(HashMap::new()),
            exclusive_row_lock_set: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn is_table_locked(&self, oid: TableOid, mode: LockMode) -> bool {
        self.table_lock_set(mode).lock().contains(&oid)
    }

    /// True if the transaction holds a table lock on `oid` in any mode
    pub fn holds_any_table_lock(&self, oid: TableOid) -> bool {
        LockMode::ALL
            .iter()
            .any(|mode| self.is_table_locked(oid, *mode))
    }

    pub fn is_row_locked(&self, oid: TableOid, rid: Rid, mode: LockMode) -> bool {
        let set = match mode {
            LockMode::Shared => &self.shared_row_lock_set,
            LockMode::Exclusive => &self.exclusive_row_lock_set,
            _ => return false,
        };
        set.lock().get(&oid).is_some_and(|rids| rids.contains(&rid))
    }

    /// True while any row of `oid` is still locked; unlocking the table
    /// is forbidden in that case
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let shared = self.shared_row_lock_set.lock();
        if shared.get(&oid).is_some_and(|rids| !rids.is_empty()) {
            return true;
        }
        drop(shared);
        let exclusive = self.exclusive_row_lock_set.lock();
        exclusive.get(&oid).is_some_and(|rids| !rids.is_empty())
    }

    pub(crate) fn insert_table_lock(&self, oid: TableOid, mode: LockMode) {
        self.table_lock_set(mode).lock().insert(oid);
    }

    pub(crate) fn remove_table_lock(&self, oid: TableOid, mode: LockMode) {
        self.table_lock_set(mode).lock().remove(&oid);
    }

    pub(crate) fn insert_row_lock(&self, oid: TableOid, rid: Rid, mode: LockMode) {
        let set = match mode {
            LockMode::Shared => &self.shared_row_lock_set,
            LockMode::Exclusive => &self.exclusive_row_lock_set,
            _ => unreachable!("row locks are shared or exclusive"),
        };
        set.lock().entry(oid).or_default().insert(rid);
    }

    pub(crate) fn remove_row_lock(&self, oid: TableOid, rid: Rid, mode: LockMode) {
        let set = match mode {
            LockMode::Shared => &self.shared_row_lock_set,
            LockMode::Exclusive => &self.exclusive_row_lock_set,
            _ => return,
        };
        if let Some(rids) = set.lock().get_mut(&oid) {
            rids.remove(&rid);
        }
    }

    /// Snapshot of all held table locks as (oid, mode) pairs
    pub fn table_locks(&self) -> Vec<(TableOid, LockMode)> {
        let mut locks = Vec::new();
        for mode in LockMode::ALL {
            for oid in self.table_lock_set(mode).lock().iter() {
                locks.push((*oid, mode));
            }
        }
        locks
    }

    /// Snapshot of all held row locks as (oid, rid, mode) triples
    pub fn row_locks(&self) -> Vec<(TableOid, Rid, LockMode)> {
        let mut locks = Vec::new();
        for (oid, rids) in self.shared_row_lock_set.lock().iter() {
            for rid in rids {
                locks.push((*oid, *rid, LockMode::Shared));
            }
        }
        for (oid, rids) in self.exclusive_row_lock_set.lock().iter() {
            for rid in rids {
                locks.push((*oid, *rid, LockMode::Exclusive));
            }
        }
        locks
    }

    fn table_lock_set(&self, mode: LockMode) -> &Mutex<HashSet<TableOid>> {
        match mode {
            LockMode::Shared => &self.shared_table_lock_set,
            LockMode::Exclusive => &self.exclusive_table_lock_set,
            LockMode::IntentionShared => &self.intention_shared_table_lock_set,
            LockMode::IntentionExclusive => &self.intention_exclusive_table_lock_set,
            LockMode::SharedIntentionExclusive => &self.shared_intention_exclusive_table_lock_set,
        }
    }
}
