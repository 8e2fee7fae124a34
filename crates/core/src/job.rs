// SPDX-License-Identifier: MIT

//! Job identifier and lifecycle metadata.
//!
//! A `Job` row is a **cached projection** of the authoritative event stream —
//! every field here must be derivable by folding that job's events (see
//! [`crate::execution_state`]). Workers mutate it under lease; nothing here
//! survives a crash except through the event log.

use crate::clock::Clock;
use crate::ids::{JobId, TenantId, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle status of a job.
///
/// Transitions are monotonic except `Waiting<->Pending` (via signal) and
/// `Running->Pending` (via lease expiry/requeue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

crate::simple_display! {
    JobStatus {
        Pending => "pending",
        Running => "running",
        Waiting => "waiting",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// A time-bounded exclusive right to execute a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: WorkerId,
    pub expires_at_epoch_ms: u64,
}

impl Lease {
    pub fn is_expired(&self, now_epoch_ms: u64) -> bool {
        now_epoch_ms >= self.expires_at_epoch_ms
    }
}

/// Job identity and lifecycle metadata — the Job Metadata Store's row type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub agent_id: String,
    pub tenant_id: TenantId,
    pub goal: String,
    pub status: JobStatus,
    /// Latest checkpoint id, or empty before the first checkpoint.
    #[serde(default)]
    pub cursor: String,
    pub required_capabilities: BTreeSet<String>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    /// Set by a retryable-failure requeue to the end of that attempt's
    /// backoff window; the claim scan skips a Pending job until this passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before_epoch_ms: Option<u64>,
    pub created_at_epoch_ms: u64,
    pub updated_at_epoch_ms: u64,
}

impl Job {
    pub fn new(
        agent_id: impl Into<String>,
        tenant_id: TenantId,
        goal: impl Into<String>,
        required_capabilities: BTreeSet<String>,
        clock: &impl Clock,
    ) -> Self {
        let now = clock.epoch_ms();
        Self {
            id: JobId::new(),
            agent_id: agent_id.into(),
            tenant_id,
            goal: goal.into(),
            status: JobStatus::Pending,
            cursor: String::new(),
            required_capabilities,
            retry_count: 0,
            lease: None,
            not_before_epoch_ms: None,
            created_at_epoch_ms: now,
            updated_at_epoch_ms: now,
        }
    }

    /// Whether `worker_capabilities` is a superset of this job's required capabilities.
    pub fn capabilities_satisfied_by(&self, worker_capabilities: &BTreeSet<String>) -> bool {
        self.required_capabilities.is_subset(worker_capabilities)
    }

    pub fn has_live_lease(&self, now_epoch_ms: u64) -> bool {
        self.lease.as_ref().is_some_and(|lease| !lease.is_expired(now_epoch_ms))
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Job {
    /// Test builder with sensible defaults; overrides applied via setters.
    pub fn builder(clock: &impl Clock) -> JobBuilder {
        JobBuilder::new(clock)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub struct JobBuilder {
    job: Job,
}

#[cfg(any(test, feature = "test-support"))]
impl JobBuilder {
    fn new(clock: &impl Clock) -> Self {
        Self { job: Job::new("test-agent", TenantId::from_string("ten-test"), "test goal", BTreeSet::new(), clock) }
    }

    pub fn agent_id(mut self, v: impl Into<String>) -> Self {
        self.job.agent_id = v.into();
        self
    }

    pub fn tenant_id(mut self, v: TenantId) -> Self {
        self.job.tenant_id = v;
        self
    }

    pub fn goal(mut self, v: impl Into<String>) -> Self {
        self.job.goal = v.into();
        self
    }

    pub fn required_capabilities(mut self, v: BTreeSet<String>) -> Self {
        self.job.required_capabilities = v;
        self
    }

    pub fn status(mut self, v: JobStatus) -> Self {
        self.job.status = v;
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn new_job_starts_pending_with_no_lease() {
        let clock = FakeClock::new();
        let job = Job::new("agent", TenantId::from_string("ten-1"), "goal", BTreeSet::new(), &clock);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.lease.is_none());
    }

    #[test]
    fn capability_subset_check() {
        let clock = FakeClock::new();
        let mut required = BTreeSet::new();
        required.insert("shell".to_string());
        let job = Job::new("agent", TenantId::from_string("ten-1"), "goal", required, &clock);

        let mut worker_caps = BTreeSet::new();
        assert!(!job.capabilities_satisfied_by(&worker_caps));
        worker_caps.insert("shell".to_string());
        worker_caps.insert("http".to_string());
        assert!(job.capabilities_satisfied_by(&worker_caps));
    }

    #[test]
    fn lease_expiry() {
        let lease = Lease { holder: crate::ids::WorkerId::from_string("wkr-1"), expires_at_epoch_ms: 1000 };
        assert!(!lease.is_expired(999));
        assert!(lease.is_expired(1000));
        assert!(lease.is_expired(1001));
    }
}
