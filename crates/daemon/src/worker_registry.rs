// SPDX-License-Identifier: MIT

//! In-process worker registry: the materialized view the reaper consults to
//! tell "lease expired, holder is dead" apart from "lease expired, holder is
//! just slow". A production deployment persists this as a `workers` table;
//! here it is one more single-mutex critical section, same shape as the
//! stores in `dar_storage`.

use dar_core::WorkerId;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    pub capabilities: BTreeSet<String>,
    pub registered_at_epoch_ms: u64,
    pub last_heartbeat_at_epoch_ms: u64,
}

pub struct WorkerRegistry {
    workers: Mutex<HashMap<WorkerId, WorkerRecord>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self { workers: Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, worker_id: WorkerId, capabilities: BTreeSet<String>, now_epoch_ms: u64) {
        self.workers.lock().insert(
            worker_id.clone(),
            WorkerRecord { worker_id, capabilities, registered_at_epoch_ms: now_epoch_ms, last_heartbeat_at_epoch_ms: now_epoch_ms },
        );
    }

    pub fn heartbeat(&self, worker_id: &WorkerId, now_epoch_ms: u64) {
        if let Some(record) = self.workers.lock().get_mut(worker_id) {
            record.last_heartbeat_at_epoch_ms = now_epoch_ms;
        }
    }

    pub fn deregister(&self, worker_id: &WorkerId) {
        self.workers.lock().remove(worker_id);
    }

    /// True when the worker is either unknown (never registered, or already
    /// reaped from the registry) or its heartbeat is older than `stale_after_ms`.
    pub fn is_stale(&self, worker_id: &WorkerId, now_epoch_ms: u64, stale_after_ms: u64) -> bool {
        match self.workers.lock().get(worker_id) {
            Some(record) => now_epoch_ms.saturating_sub(record.last_heartbeat_at_epoch_ms) > stale_after_ms,
            None => true,
        }
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_worker_is_stale() {
        let registry = WorkerRegistry::new();
        assert!(registry.is_stale(&WorkerId::from_string("wkr-1"), 1_000, 500));
    }

    #[test]
    fn fresh_heartbeat_is_not_stale() {
        let registry = WorkerRegistry::new();
        let worker = WorkerId::from_string("wkr-1");
        registry.register(worker.clone(), BTreeSet::new(), 0);
        registry.heartbeat(&worker, 1_000);
        assert!(!registry.is_stale(&worker, 1_200, 500));
    }

    #[test]
    fn old_heartbeat_is_stale() {
        let registry = WorkerRegistry::new();
        let worker = WorkerId::from_string("wkr-1");
        registry.register(worker.clone(), BTreeSet::new(), 0);
        assert!(registry.is_stale(&worker, 10_000, 500));
    }

    #[test]
    fn deregistered_worker_is_stale() {
        let registry = WorkerRegistry::new();
        let worker = WorkerId::from_string("wkr-1");
        registry.register(worker.clone(), BTreeSet::new(), 0);
        registry.deregister(&worker);
        assert!(registry.is_stale(&worker, 0, 500));
    }
}
