use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbortError, TransactionState,
};

/// Hierarchical lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    pub const ALL: [LockMode; 5] = [
        LockMode::IntentionShared,
        LockMode::IntentionExclusive,
        LockMode::Shared,
        LockMode::SharedIntentionExclusive,
        LockMode::Exclusive,
    ];

    /// Standard compatibility matrix: may `held` and `requested` be
    /// granted simultaneously?
    pub fn compatible(held: LockMode, requested: LockMode) -> bool {
        use LockMode::*;
        match held {
            IntentionShared => requested != Exclusive,
            IntentionExclusive => matches!(requested, IntentionShared | IntentionExclusive),
            Shared => matches!(requested, IntentionShared | Shared),
            SharedIntentionExclusive => requested == IntentionShared,
            Exclusive => false,
        }
    }

    /// May a held lock of this mode be upgraded to `to`?
    fn upgradable_to(self, to: LockMode) -> bool {
        use LockMode::*;
        match self {
            IntentionShared => matches!(
                to,
                Shared | Exclusive | IntentionExclusive | SharedIntentionExclusive
            ),
            Shared => matches!(to, Exclusive | SharedIntentionExclusive),
            IntentionExclusive => matches!(to, Exclusive | SharedIntentionExclusive),
            SharedIntentionExclusive => to == Exclusive,
            Exclusive => false,
        }
    }

    fn is_shared_kind(self) -> bool {
        matches!(
            self,
            LockMode::Shared | LockMode::IntentionShared | LockMode::SharedIntentionExclusive
        )
    }
}

pub(crate) struct LockRequest {
    pub txn_id: TxnId,
    pub mode: LockMode,
    pub granted: bool,
}

#[derive(Default)]
pub(crate) struct RequestQueueInner {
    pub requests: Vec<LockRequest>,
    /// At most one transaction may be upgrading at a time
    pub upgrading: Option<TxnId>,
}

/// Per-object request queue: FIFO list of requests plus the upgrade
/// slot, guarded by its own mutex and condition variable.
#[derive(Default)]
pub(crate) struct LockRequestQueue {
    pub inner: Mutex<RequestQueueInner>,
    pub cv: Condvar,
}

#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// How often the background detector scans for deadlocks
    pub detection_interval: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            detection_interval: Duration::from_millis(50),
        }
    }
}

/// Table- and row-level lock manager implementing strict two-phase
/// locking under the three isolation levels.
///
/// The map mutexes only guard queue creation and lookup; they are always
/// released before a queue's own mutex is taken.
pub struct LockManager {
    pub(crate) config: LockManagerConfig,
    pub(crate) table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    pub(crate) row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    pub(crate) detector_running: Arc<AtomicBool>,
    pub(crate) detector_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new(config: LockManagerConfig) -> Self {
        Self {
            config,
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            detector_running: Arc::new(AtomicBool::new(false)),
            detector_handle: Mutex::new(None),
        }
    }

    /// Acquire a table lock.
    ///
    /// Blocks until granted. Returns `Ok(false)` when the transaction
    /// was aborted out of band (deadlock victim) while waiting; contract
    /// violations abort the transaction and surface as errors.
    pub fn lock_table(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionAbortError> {
        self.check_acquisition_state(txn, mode)?;

        let queue = self.table_queue(oid);
        let mut inner = queue.inner.lock();

        // Same transaction already in the queue: re-request or upgrade.
        if let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id())
        {
            debug_assert!(inner.requests[pos].granted, "pending request re-entered");
            let held = inner.requests[pos].mode;
            if held == mode {
                return Ok(true);
            }
            if inner.upgrading.is_some() {
                drop(inner);
                queue.cv.notify_all();
                return Err(self.abort_txn(txn, AbortReason::UpgradeConflict));
            }
            if !held.upgradable_to(mode) {
                return Err(self.abort_txn(txn, AbortReason::IncompatibleUpgrade));
            }
            inner.requests.remove(pos);
            txn.remove_table_lock(oid, held);
            inner.upgrading = Some(txn.id());
            // The upgrader waits ahead of every still-pending request
            let insert_at = Self::first_pending_position(&inner);
            inner.requests.insert(
                insert_at,
                LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: false,
                },
            );
        } else {
            inner.requests.push(LockRequest {
                txn_id: txn.id(),
                mode,
                granted: false,
            });
        }

        loop {
            if txn.state() == TransactionState::Aborted {
                Self::withdraw(&mut inner, txn.id());
                queue.cv.notify_all();
                return Ok(false);
            }
            if Self::try_grant(&mut inner, txn.id(), mode) {
                txn.insert_table_lock(oid, mode);
                debug!("txn {} granted {:?} on table {}", txn.id(), mode, oid);
                queue.cv.notify_all();
                return Ok(true);
            }
            queue.cv.wait(&mut inner);
        }
    }

    /// Release a table lock. Forbidden while row locks on the table are
    /// still held.
    pub fn unlock_table(
        &self,
        txn: &Transaction,
        oid: TableOid,
    ) -> Result<(), TransactionAbortError> {
        if txn.holds_row_locks_on(oid) {
            return Err(self.abort_txn(txn, AbortReason::TableLockNotPresent));
        }

        let queue = match self.find_table_queue(oid) {
            Some(queue) => queue,
            None => return Err(self.abort_txn(txn, AbortReason::TableLockNotPresent)),
        };

        let mut inner = queue.inner.lock();
        let pos = match inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        {
            Some(pos) => pos,
            None => {
                drop(inner);
                return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld));
            }
        };

        let mode = inner.requests[pos].mode;
        self.maybe_enter_shrinking(txn, mode);
        inner.requests.remove(pos);
        drop(inner);

        txn.remove_table_lock(oid, mode);
        queue.cv.notify_all();
        debug!("txn {} released {:?} on table {}", txn.id(), mode, oid);
        Ok(())
    }

    /// Acquire a row lock. Rows support only S and X, and require a
    /// covering table lock.
    pub fn lock_row(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionAbortError> {
        if !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
            return Err(self.abort_txn(txn, AbortReason::AttemptedIntentionLockOnRow));
        }

        self.check_acquisition_state(txn, mode)?;

        // Row-requires-table rule
        let table_ok = match mode {
            LockMode::Exclusive => {
                txn.is_table_locked(oid, LockMode::Exclusive)
                    || txn.is_table_locked(oid, LockMode::IntentionExclusive)
                    || txn.is_table_locked(oid, LockMode::SharedIntentionExclusive)
            }
            _ => txn.holds_any_table_lock(oid),
        };
        if !table_ok {
            return Err(self.abort_txn(txn, AbortReason::TableLockNotPresent));
        }

        let queue = self.row_queue(rid);
        let mut inner = queue.inner.lock();

        if let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id())
        {
            debug_assert!(inner.requests[pos].granted, "pending request re-entered");
            let held = inner.requests[pos].mode;
            if held == mode {
                return Ok(true);
            }
            if inner.upgrading.is_some() {
                drop(inner);
                queue.cv.notify_all();
                return Err(self.abort_txn(txn, AbortReason::UpgradeConflict));
            }
            if !held.upgradable_to(mode) {
                return Err(self.abort_txn(txn, AbortReason::IncompatibleUpgrade));
            }
            inner.requests.remove(pos);
            txn.remove_row_lock(oid, rid, held);
            inner.upgrading = Some(txn.id());
            let insert_at = Self::first_pending_position(&inner);
            inner.requests.insert(
                insert_at,
                LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: false,
                },
            );
        } else {
            inner.requests.push(LockRequest {
                txn_id: txn.id(),
                mode,
                granted: false,
            });
        }

        loop {
            if txn.state() == TransactionState::Aborted {
                Self::withdraw(&mut inner, txn.id());
                queue.cv.notify_all();
                return Ok(false);
            }
            if Self::try_grant(&mut inner, txn.id(), mode) {
                txn.insert_row_lock(oid, rid, mode);
                debug!("txn {} granted {:?} on row {}", txn.id(), mode, rid);
                queue.cv.notify_all();
                return Ok(true);
            }
            queue.cv.wait(&mut inner);
        }
    }

    /// Release a row lock
    pub fn unlock_row(
        &self,
        txn: &Transaction,
        oid: TableOid,
        rid: Rid,
    ) -> Result<(), TransactionAbortError> {
        let queue = match self.find_row_queue(rid) {
            Some(queue) => queue,
            None => return Err(self.abort_txn(txn, AbortReason::TableLockNotPresent)),
        };

        let mut inner = queue.inner.lock();
        let pos = match inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        {
            Some(pos) => pos,
            None => {
                drop(inner);
                return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld));
            }
        };

        let mode = inner.requests[pos].mode;
        self.maybe_enter_shrinking(txn, mode);
        inner.requests.remove(pos);
        drop(inner);

        txn.remove_row_lock(oid, rid, mode);
        queue.cv.notify_all();
        Ok(())
    }

    /// Release every lock the transaction still holds: rows first, then
    /// tables. Used by commit, abort and the deadlock detector.
    pub fn release_all(&self, txn: &Transaction) {
        for (oid, rid, _mode) in txn.row_locks() {
            let _ = self.unlock_row(txn, oid, rid);
        }
        for (oid, _mode) in txn.table_locks() {
            let _ = self.unlock_table(txn, oid);
        }
    }

    /// Gate every acquisition on the transaction lifecycle and isolation
    /// level.
    fn check_acquisition_state(
        &self,
        txn: &Transaction,
        mode: LockMode,
    ) -> Result<(), TransactionAbortError> {
        let state = txn.state();
        if state == TransactionState::Aborted || state == TransactionState::Committed {
            // Already terminal; do not flip the state again
            return Err(TransactionAbortError {
                txn_id: txn.id(),
                reason: AbortReason::TableLockNotPresent,
            });
        }

        if state == TransactionState::Shrinking {
            let allowed = txn.isolation_level() == IsolationLevel::ReadCommitted
                && matches!(mode, LockMode::Shared | LockMode::IntentionShared);
            if !allowed {
                return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
            }
        }

        if state == TransactionState::Growing
            && txn.isolation_level() == IsolationLevel::ReadUncommitted
            && mode.is_shared_kind()
        {
            return Err(self.abort_txn(txn, AbortReason::LockSharedOnReadUncommitted));
        }

        Ok(())
    }

    /// Can this pending request be granted right now?
    ///
    /// All granted requests of other transactions must be compatible; a
    /// pending upgrade gives its owner exclusive next-grant priority;
    /// otherwise strict FIFO: only the first pending request may go,
    /// even if a later one is compatible with everything granted.
    fn try_grant(inner: &mut RequestQueueInner, txn_id: TxnId, mode: LockMode) -> bool {
        for r in inner.requests.iter() {
            if r.granted && r.txn_id != txn_id && !LockMode::compatible(r.mode, mode) {
                return false;
            }
        }

        if let Some(upgrader) = inner.upgrading {
            if upgrader != txn_id {
                return false;
            }
            if let Some(pos) = inner
                .requests
                .iter()
                .position(|r| r.txn_id == txn_id && !r.granted)
            {
                inner.requests[pos].granted = true;
                inner.upgrading = None;
                return true;
            }
            return false;
        }

        match inner.requests.iter().position(|r| !r.granted) {
            Some(pos) if inner.requests[pos].txn_id == txn_id => {
                inner.requests[pos].granted = true;
                true
            }
            _ => false,
        }
    }

    /// Remove the caller's pending request after an out-of-band abort
    fn withdraw(inner: &mut RequestQueueInner, txn_id: TxnId) {
        inner.requests.retain(|r| !(r.txn_id == txn_id && !r.granted));
        if inner.upgrading == Some(txn_id) {
            inner.upgrading = None;
        }
    }

    fn first_pending_position(inner: &RequestQueueInner) -> usize {
        inner
            .requests
            .iter()
            .position(|r| !r.granted)
            .unwrap_or(inner.requests.len())
    }

    /// Strict 2PL transition: releasing X always enters shrinking;
    /// releasing S does so only under repeatable read.
    fn maybe_enter_shrinking(&self, txn: &Transaction, mode: LockMode) {
        let state = txn.state();
        if state == TransactionState::Committed || state == TransactionState::Aborted {
            return;
        }
        let transition = mode == LockMode::Exclusive
            || (mode == LockMode::Shared
                && txn.isolation_level() == IsolationLevel::RepeatableRead);
        if transition {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    fn abort_txn(&self, txn: &Transaction, reason: AbortReason) -> TransactionAbortError {
        txn.set_state(TransactionState::Aborted);
        debug!("txn {} aborted: {}", txn.id(), reason);
        TransactionAbortError {
            txn_id: txn.id(),
            reason,
        }
    }

    fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        let mut map = self.table_lock_map.lock();
        map.entry(oid).or_default().clone()
    }

    fn find_table_queue(&self, oid: TableOid) -> Option<Arc<LockRequestQueue>> {
        self.table_lock_map.lock().get(&oid).cloned()
    }

    fn row_queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        let mut map = self.row_lock_map.lock();
        map.entry(rid).or_default().clone()
    }

    fn find_row_queue(&self, rid: Rid) -> Option<Arc<LockRequestQueue>> {
        self.row_lock_map.lock().get(&rid).cloned()
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.stop_deadlock_detection();
    }
}
