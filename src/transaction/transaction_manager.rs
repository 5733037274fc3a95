use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::TxnId;
use crate::transaction::concurrency::LockManager;
use crate::transaction::transaction::{IsolationLevel, Transaction, TransactionState};

#[derive(Error, Debug)]
pub enum TransactionManagerError {
    #[error("Transaction {0} is already committed or aborted")]
    InvalidState(TxnId),

    #[error("Transaction {0} not found")]
    NotFound(TxnId),
}

/// Creates and tracks transactions, and drives strict 2PL teardown:
/// commit and abort both end by releasing every held lock.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Commit: release all locks and retire the transaction
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionManagerError> {
        if txn.state() == TransactionState::Aborted || txn.state() == TransactionState::Committed {
            return Err(TransactionManagerError::InvalidState(txn.id()));
        }
        txn.set_state(TransactionState::Committed);
        self.lock_manager.release_all(txn);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    /// Abort: mark aborted, release all locks and retire the transaction
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionManagerError> {
        if txn.state() == TransactionState::Committed {
            return Err(TransactionManagerError::InvalidState(txn.id()));
        }
        txn.set_state(TransactionState::Aborted);
        self.lock_manager.release_all(txn);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    /// Look up an active transaction (used by the deadlock detector)
    pub fn get(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::concurrency::LockManagerConfig;

    fn make_manager() -> TransactionManager {
        TransactionManager::new(Arc::new(LockManager::new(LockManagerConfig::default())))
    }

    #[test]
    fn test_begin_assigns_increasing_ids() {
        let tm = make_manager();
        let t1 = tm.begin(IsolationLevel::RepeatableRead);
        let t2 = tm.begin(IsolationLevel::ReadCommitted);
        assert!(t2.id() > t1.id());
        assert_eq!(tm.active_transaction_ids().len(), 2);
    }

    #[test]
    fn test_commit_retires_transaction() {
        let tm = make_manager();
        let txn = tm.begin(IsolationLevel::RepeatableRead);
        tm.commit(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(tm.get(txn.id()).is_none());

        // A second commit is invalid
        assert!(tm.commit(&txn).is_err());
    }

    #[test]
    fn test_abort_retires_transaction() {
        let tm = make_manager();
        let txn = tm.begin(IsolationLevel::ReadCommitted);
        tm.abort(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(tm.get(txn.id()).is_none());
    }
}
