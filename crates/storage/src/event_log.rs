// SPDX-License-Identifier: MIT

//! Append-only, per-job versioned event log with a SHA-256 hash chain.
//!
//! The persistent implementation this trait models uses a relational table
//! with a unique `(job_id, version)` index and a CAS-guarded
//! `INSERT ... WHERE current_max_version = expected_version`. The in-process
//! [`InMemoryEventLog`] gets the same correctness with a single mutex: the
//! version check and the append happen inside one critical section.

use async_trait::async_trait;
use dar_core::{Event, JobId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// One immutable record in a job's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: String,
    pub job_id: JobId,
    pub version: u64,
    pub event: Event,
    pub created_at_rfc3339: String,
    pub prev_hash: String,
    pub hash: String,
}

impl StoredEvent {
    /// Recompute the hash from this record's fields and compare to `self.hash`.
    pub fn verify(&self) -> bool {
        let payload = serde_json::to_value(&self.event).unwrap_or(serde_json::Value::Null);
        let expected =
            dar_core::hash::event_hash(self.job_id.as_str(), self.event.type_tag(), &payload, &self.created_at_rfc3339, &self.prev_hash);
        expected == self.hash
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum EventLogError {
    #[error("version mismatch for job {job_id}: expected {expected}, found {actual}")]
    VersionMismatch { job_id: String, expected: u64, actual: u64 },
}

impl From<EventLogError> for dar_core::RuntimeError {
    fn from(err: EventLogError) -> Self {
        match err {
            EventLogError::VersionMismatch { expected, actual, .. } => {
                dar_core::RuntimeError::VersionMismatch { expected, actual }
            }
        }
    }
}

/// The Event Log component: append-only, CAS-guarded, hash-chained.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append one event at `expected_version` (the log's current length before
    /// this append). Returns the new version on success.
    async fn append(&self, job_id: &JobId, expected_version: u64, event: Event) -> Result<u64, EventLogError>;

    /// Load all events for a job and the log's current version.
    async fn list_events(&self, job_id: &JobId) -> (Vec<StoredEvent>, u64);

    /// List all job ids with at least one event (used by store-level tenant scans).
    async fn list_job_ids(&self) -> Vec<JobId>;
}

#[derive(Default)]
struct JobLog {
    events: Vec<StoredEvent>,
}

/// In-memory reference implementation of the Event Log.
pub struct InMemoryEventLog {
    clock: Box<dyn Fn() -> String + Send + Sync>,
    logs: Mutex<HashMap<JobId, JobLog>>,
    next_seq: Mutex<u64>,
}

impl InMemoryEventLog {
    /// `now_rfc3339` supplies the `created_at` timestamp for each append — a
    /// closure rather than a `Clock` so callers can plug in any time source
    /// without this crate depending on `chrono`'s feature surface directly.
    pub fn new(now_rfc3339: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self { clock: Box::new(now_rfc3339), logs: Mutex::new(HashMap::new()), next_seq: Mutex::new(0) }
    }

    fn next_event_id(&self) -> String {
        let mut seq = self.next_seq.lock();
        *seq += 1;
        format!("evt-{:016x}", *seq)
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new(|| chrono::Utc::now().to_rfc3339())
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, job_id: &JobId, expected_version: u64, event: Event) -> Result<u64, EventLogError> {
        let mut logs = self.logs.lock();
        let log = logs.entry(job_id.clone()).or_default();
        let actual = log.events.len() as u64;
        if actual != expected_version {
            return Err(EventLogError::VersionMismatch { job_id: job_id.to_string(), expected: expected_version, actual });
        }

        let prev_hash = log.events.last().map(|e| e.hash.clone()).unwrap_or_default();
        let created_at = (self.clock)();
        let payload = serde_json::to_value(&event).unwrap_or(serde_json::Value::Null);
        let hash = dar_core::hash::event_hash(job_id.as_str(), event.type_tag(), &payload, &created_at, &prev_hash);

        let stored = StoredEvent {
            id: self.next_event_id(),
            job_id: job_id.clone(),
            version: actual + 1,
            event,
            created_at_rfc3339: created_at,
            prev_hash,
            hash,
        };
        log.events.push(stored);
        Ok(actual + 1)
    }

    async fn list_events(&self, job_id: &JobId) -> (Vec<StoredEvent>, u64) {
        let logs = self.logs.lock();
        match logs.get(job_id) {
            Some(log) => (log.events.clone(), log.events.len() as u64),
            None => (Vec::new(), 0),
        }
    }

    async fn list_job_ids(&self) -> Vec<JobId> {
        self.logs.lock().keys().cloned().collect()
    }
}

/// Shared handle alias used throughout the engine/daemon crates.
pub type SharedEventLog = Arc<dyn EventLog>;

#[cfg(test)]
mod tests {
    use super::*;
    use dar_core::JobId;

    fn fixed_clock() -> InMemoryEventLog {
        InMemoryEventLog::new(|| "2026-01-01T00:00:00Z".to_string())
    }

    #[tokio::test]
    async fn append_rejects_stale_expected_version() {
        let log = fixed_clock();
        let job_id = JobId::from_string("job-1");
        log.append(&job_id, 0, Event::JobQueued { id: job_id.clone() }).await.unwrap();
        let err = log.append(&job_id, 0, Event::JobQueued { id: job_id.clone() }).await.unwrap_err();
        assert_eq!(err, EventLogError::VersionMismatch { job_id: job_id.to_string(), expected: 0, actual: 1 });
    }

    #[tokio::test]
    async fn events_form_a_gap_free_hash_chain() {
        let log = fixed_clock();
        let job_id = JobId::from_string("job-1");
        log.append(&job_id, 0, Event::JobQueued { id: job_id.clone() }).await.unwrap();
        log.append(&job_id, 1, Event::JobCancelled { id: job_id.clone() }).await.unwrap();

        let (events, version) = log.list_events(&job_id).await;
        assert_eq!(version, 2);
        assert_eq!(events[0].prev_hash, "");
        assert_eq!(events[1].prev_hash, events[0].hash);
        assert!(events.iter().all(|e| e.verify()));
    }

    #[tokio::test]
    async fn concurrent_appends_only_one_wins_per_version() {
        let log = Arc::new(fixed_clock());
        let job_id = JobId::from_string("job-race");
        log.append(&job_id, 0, Event::JobQueued { id: job_id.clone() }).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let log = log.clone();
            let job_id = job_id.clone();
            handles.push(tokio::spawn(async move { log.append(&job_id, 1, Event::JobCancelled { id: job_id.clone() }).await }));
        }
        let mut ok_count = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                ok_count += 1;
            }
        }
        assert_eq!(ok_count, 1);
    }
}
