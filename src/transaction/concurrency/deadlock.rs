use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use log::warn;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::{LockManager, LockMode, LockRequestQueue};
use crate::transaction::transaction::TransactionState;
use crate::transaction::transaction_manager::TransactionManager;

/// Wait-for graph, rebuilt from scratch on every detector pass.
///
/// Ordered maps keep traversal deterministic, which the victim choice
/// (largest transaction id in some cycle) depends on.
pub(crate) struct WaitsForGraph {
    edges: BTreeMap<TxnId, BTreeSet<TxnId>>,
}

impl WaitsForGraph {
    pub fn new() -> Self {
        Self {
            edges: BTreeMap::new(),
        }
    }

    /// `waiter` waits for `holder`
    pub fn add_edge(&mut self, waiter: TxnId, holder: TxnId) {
        self.edges.entry(waiter).or_default().insert(holder);
    }

    /// Drop a transaction and every edge touching it
    pub fn remove_txn(&mut self, txn_id: TxnId) {
        self.edges.remove(&txn_id);
        for targets in self.edges.values_mut() {
            targets.remove(&txn_id);
        }
    }

    /// Find any cycle by DFS; returns its member transaction ids.
    pub fn find_cycle(&self) -> Option<Vec<TxnId>> {
        let mut visited = BTreeSet::new();
        let mut path = Vec::new();
        for &start in self.edges.keys() {
            if visited.contains(&start) {
                continue;
            }
            if let Some(cycle) = self.dfs(start, &mut visited, &mut path) {
                return Some(cycle);
            }
            debug_assert!(path.is_empty());
        }
        None
    }

    fn dfs(
        &self,
        node: TxnId,
        visited: &mut BTreeSet<TxnId>,
        path: &mut Vec<TxnId>,
    ) -> Option<Vec<TxnId>> {
        visited.insert(node);
        path.push(node);

        if let Some(targets) = self.edges.get(&node) {
            for &next in targets {
                if let Some(start) = path.iter().position(|&t| t == next) {
                    return Some(path[start..].to_vec());
                }
                if !visited.contains(&next) {
                    if let Some(cycle) = self.dfs(next, visited, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        None
    }
}

impl LockManager {
    /// Start the background deadlock detector.
    ///
    /// The thread holds only weak references, so dropping the lock
    /// manager (or the transaction manager) ends it; `Drop` also stops
    /// it explicitly.
    pub fn start_deadlock_detection(self: &Arc<Self>, txn_manager: &Arc<TransactionManager>) {
        let interval = self.config.detection_interval;
        let running = Arc::clone(&self.detector_running);
        running.store(true, Ordering::SeqCst);

        let weak_lm = Arc::downgrade(self);
        let weak_tm = Arc::downgrade(txn_manager);
        let flag = Arc::clone(&running);
        let handle = thread::spawn(move || loop {
            thread::sleep(interval);
            if !flag.load(Ordering::SeqCst) {
                break;
            }
            let (lm, tm) = match (weak_lm.upgrade(), weak_tm.upgrade()) {
                (Some(lm), Some(tm)) => (lm, tm),
                _ => break,
            };
            lm.detect_deadlocks(&tm);
        });

        *self.detector_handle.lock() = Some(handle);
    }

    pub fn stop_deadlock_detection(&self) {
        self.detector_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector_handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// One detector pass: rebuild the wait-for graph, then abort the
    /// youngest member (largest id) of every cycle until none remain.
    pub(crate) fn detect_deadlocks(&self, txn_manager: &TransactionManager) {
        let mut graph = WaitsForGraph::new();
        for queue in self.all_queues() {
            let inner = queue.inner.lock();
            for pending in inner.requests.iter().filter(|r| !r.granted) {
                for granted in inner.requests.iter().filter(|r| r.granted) {
                    if granted.txn_id != pending.txn_id
                        && !LockMode::compatible(granted.mode, pending.mode)
                    {
                        graph.add_edge(pending.txn_id, granted.txn_id);
                    }
                }
            }
        }

        while let Some(mut cycle) = graph.find_cycle() {
            cycle.sort_unstable();
            let victim = *cycle.last().expect("cycle is never empty");
            warn!(
                "deadlock among transactions {:?}; aborting {}",
                cycle, victim
            );
            graph.remove_txn(victim);

            if let Some(txn) = txn_manager.get(victim) {
                txn.set_state(TransactionState::Aborted);
                self.release_all(&txn);
            }
            self.notify_waiters_of(victim);
        }
    }

    /// Wake every queue in which the aborted transaction has a request,
    /// so its waiting call can withdraw and return.
    fn notify_waiters_of(&self, txn_id: TxnId) {
        for queue in self.all_queues() {
            let involved = {
                let inner = queue.inner.lock();
                inner.requests.iter().any(|r| r.txn_id == txn_id)
            };
            if involved {
                queue.cv.notify_all();
            }
        }
    }

    fn all_queues(&self) -> Vec<Arc<LockRequestQueue>> {
        let mut queues: Vec<Arc<LockRequestQueue>> =
            self.table_lock_map.lock().values().cloned().collect();
        queues.extend(self.row_lock_map.lock().values().cloned());
        queues
    }
}
