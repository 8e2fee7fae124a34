// SPDX-License-Identifier: MIT

//! Signal Bus: the API-side entry point external callers (approvals,
//! webhooks) use to unblock a waiting job, or to cancel one outright.
//! `signal` appends `wait_completed` and flips the job's status back to
//! Pending; `cancel` appends `job_cancelled` and moves it to Cancelled.

use dar_core::{Event, JobId, RuntimeError};
use dar_storage::{JobStore, SharedEventLog, SharedJobStore, WakeupIndex};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error(transparent)]
    EventLog(#[from] dar_storage::EventLogError),
    #[error(transparent)]
    JobStore(#[from] dar_storage::JobStoreError),
}

impl From<SignalError> for RuntimeError {
    fn from(err: SignalError) -> Self {
        match err {
            SignalError::EventLog(e) => e.into(),
            SignalError::JobStore(e) => e.into(),
        }
    }
}

pub struct SignalBus {
    event_log: SharedEventLog,
    job_store: SharedJobStore,
    wakeup: Arc<WakeupIndex>,
}

impl SignalBus {
    pub fn new(event_log: SharedEventLog, job_store: SharedJobStore, wakeup: Arc<WakeupIndex>) -> Self {
        Self { event_log, job_store, wakeup }
    }

    /// Deliver an external signal to a specific waiting job.
    pub async fn signal(&self, job_id: &JobId, correlation_key: &str, payload: serde_json::Value) -> Result<(), SignalError> {
        let (_, version) = self.event_log.list_events(job_id).await;
        self.event_log
            .append(job_id, version, Event::WaitCompleted { correlation_key: correlation_key.to_string(), payload })
            .await?;
        self.job_store.update_status(job_id, dar_core::job::JobStatus::Pending).await?;
        self.wakeup.notify_ready(job_id.clone());
        Ok(())
    }

    /// Cancel a job from outside the worker that holds it. Appends
    /// `job_cancelled` and transitions status to Cancelled; a worker mid-attempt
    /// discovers this the next time it tries to claim or renew the lease.
    pub async fn cancel(&self, job_id: &JobId) -> Result<(), SignalError> {
        let (_, version) = self.event_log.list_events(job_id).await;
        self.event_log.append(job_id, version, Event::JobCancelled { id: job_id.clone() }).await?;
        self.job_store.update_status(job_id, dar_core::job::JobStatus::Cancelled).await?;
        Ok(())
    }
}
