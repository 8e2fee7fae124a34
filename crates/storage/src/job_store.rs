// SPDX-License-Identifier: MIT

//! Job Metadata Store: the scheduler's claim primitive plus lease
//! fencing. The in-process reference implementation guards the whole table
//! with one lock, which is the single-critical-section equivalent of
//! `SELECT ... FOR UPDATE SKIP LOCKED`.

use async_trait::async_trait;
use dar_core::job::{Job, JobStatus, Lease};
use dar_core::{JobId, TenantId, WorkerId};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum JobStoreError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("lease fencing failure: worker {worker_id} is not the current holder of job {job_id}")]
    LeaseLost { job_id: String, worker_id: String },
}

impl From<JobStoreError> for dar_core::RuntimeError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => dar_core::RuntimeError::Unplanned(id),
            JobStoreError::LeaseLost { job_id, .. } => dar_core::RuntimeError::LeaseLost { job_id },
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: Job) -> Result<(), JobStoreError>;
    async fn get(&self, id: &JobId) -> Result<Job, JobStoreError>;
    async fn list_by_agent(&self, agent_id: &str, tenant_id: &TenantId) -> Vec<Job>;
    async fn update_status(&self, id: &JobId, status: JobStatus) -> Result<(), JobStoreError>;
    async fn update_cursor(&self, id: &JobId, checkpoint_id: &str) -> Result<(), JobStoreError>;

    /// The scheduler primitive: atomically claim the oldest eligible Pending
    /// job for `worker_id`, or `None` if nothing is ready.
    async fn claim_next_pending_for_worker(
        &self,
        worker_id: &WorkerId,
        capabilities: &BTreeSet<String>,
        tenant: Option<&TenantId>,
        lease_ttl_ms: u64,
        now_epoch_ms: u64,
    ) -> Option<Job>;

    /// `not_before_epoch_ms` is the end of this attempt's backoff window (0
    /// for an immediate requeue, e.g. the reaper reclaiming a dead worker's
    /// lease); the claim scan won't surface the job again until then.
    async fn requeue(&self, id: &JobId, reason: &str, not_before_epoch_ms: u64) -> Result<(), JobStoreError>;
    async fn renew_lease(&self, worker_id: &WorkerId, job_id: &JobId, ttl_ms: u64, now_epoch_ms: u64) -> Result<(), JobStoreError>;

    /// Fencing check: error if `worker_id` is no longer the live lease holder.
    async fn validate_attempt(&self, worker_id: &WorkerId, job_id: &JobId, now_epoch_ms: u64) -> Result<(), JobStoreError>;

    /// The reaper's scan primitive: every Running job whose lease has
    /// expired, regardless of agent or tenant.
    async fn list_running_with_expired_lease(&self, now_epoch_ms: u64) -> Vec<Job>;
}

pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self { jobs: Mutex::new(HashMap::new()) }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<(), JobStoreError> {
        self.jobs.lock().insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Job, JobStoreError> {
        self.jobs.lock().get(id).cloned().ok_or_else(|| JobStoreError::NotFound(id.to_string()))
    }

    async fn list_by_agent(&self, agent_id: &str, tenant_id: &TenantId) -> Vec<Job> {
        self.jobs
            .lock()
            .values()
            .filter(|j| j.agent_id == agent_id && &j.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    async fn update_status(&self, id: &JobId, status: JobStatus) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(id).ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;
        job.status = status;
        Ok(())
    }

    async fn update_cursor(&self, id: &JobId, checkpoint_id: &str) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(id).ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;
        job.cursor = checkpoint_id.to_string();
        Ok(())
    }

    async fn claim_next_pending_for_worker(
        &self,
        worker_id: &WorkerId,
        capabilities: &BTreeSet<String>,
        tenant: Option<&TenantId>,
        lease_ttl_ms: u64,
        now_epoch_ms: u64,
    ) -> Option<Job> {
        // Single critical section: scan + transition happen atomically, so N
        // concurrent callers produce N distinct claims (no double-claim).
        let mut jobs = self.jobs.lock();
        let mut candidates: Vec<&JobId> = jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Pending
                    && j.capabilities_satisfied_by(capabilities)
                    && tenant.map_or(true, |t| &j.tenant_id == t)
                    && !j.has_live_lease(now_epoch_ms)
                    && j.not_before_epoch_ms.map_or(true, |t| now_epoch_ms >= t)
            })
            .map(|j| &j.id)
            .collect();
        // FIFO by created_at, ties broken by job id.
        candidates.sort_by(|a, b| {
            let ja = &jobs[*a];
            let jb = &jobs[*b];
            ja.created_at_epoch_ms.cmp(&jb.created_at_epoch_ms).then_with(|| ja.id.as_str().cmp(jb.id.as_str()))
        });
        let chosen_id = candidates.first().map(|id| (*id).clone())?;

        let job = jobs.get_mut(&chosen_id).expect("candidate exists");
        job.status = JobStatus::Running;
        job.lease = Some(Lease { holder: worker_id.clone(), expires_at_epoch_ms: now_epoch_ms + lease_ttl_ms });
        job.not_before_epoch_ms = None;
        job.updated_at_epoch_ms = now_epoch_ms;
        Some(job.clone())
    }

    async fn requeue(&self, id: &JobId, _reason: &str, not_before_epoch_ms: u64) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(id).ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;
        job.status = JobStatus::Pending;
        job.lease = None;
        job.retry_count += 1;
        job.not_before_epoch_ms = if not_before_epoch_ms > 0 { Some(not_before_epoch_ms) } else { None };
        Ok(())
    }

    async fn renew_lease(&self, worker_id: &WorkerId, job_id: &JobId, ttl_ms: u64, now_epoch_ms: u64) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(job_id).ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        match &job.lease {
            Some(lease) if &lease.holder == worker_id && !lease.is_expired(now_epoch_ms) => {
                job.lease = Some(Lease { holder: worker_id.clone(), expires_at_epoch_ms: now_epoch_ms + ttl_ms });
                Ok(())
            }
            _ => Err(JobStoreError::LeaseLost { job_id: job_id.to_string(), worker_id: worker_id.to_string() }),
        }
    }

    async fn validate_attempt(&self, worker_id: &WorkerId, job_id: &JobId, now_epoch_ms: u64) -> Result<(), JobStoreError> {
        let jobs = self.jobs.lock();
        let job = jobs.get(job_id).ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Err(JobStoreError::LeaseLost { job_id: job_id.to_string(), worker_id: worker_id.to_string() });
        }
        match &job.lease {
            Some(lease) if &lease.holder == worker_id && !lease.is_expired(now_epoch_ms) => Ok(()),
            _ => Err(JobStoreError::LeaseLost { job_id: job_id.to_string(), worker_id: worker_id.to_string() }),
        }
    }

    async fn list_running_with_expired_lease(&self, now_epoch_ms: u64) -> Vec<Job> {
        self.jobs
            .lock()
            .values()
            .filter(|j| j.status == JobStatus::Running && j.lease.as_ref().map_or(true, |l| l.is_expired(now_epoch_ms)))
            .cloned()
            .collect()
    }
}

pub type SharedJobStore = Arc<dyn JobStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use dar_core::clock::FakeClock;

    fn sample_job(clock: &FakeClock) -> Job {
        Job::new("agent-1", TenantId::from_string("ten-1"), "goal", BTreeSet::new(), clock)
    }

    #[tokio::test]
    async fn claim_transitions_pending_to_running_with_lease() {
        let store = InMemoryJobStore::new();
        let clock = FakeClock::new();
        let job = sample_job(&clock);
        let job_id = job.id.clone();
        store.create(job).await.unwrap();

        let worker = WorkerId::from_string("wkr-1");
        let claimed = store.claim_next_pending_for_worker(&worker, &BTreeSet::new(), None, 30_000, 0).await.unwrap();
        assert_eq!(claimed.id, job_id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.lease.unwrap().holder, worker);
    }

    #[tokio::test]
    async fn two_workers_racing_only_one_gets_the_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let clock = FakeClock::new();
        store.create(sample_job(&clock)).await.unwrap();

        let w1 = WorkerId::from_string("wkr-1");
        let w2 = WorkerId::from_string("wkr-2");
        let caps = BTreeSet::new();
        let (a, b) = tokio::join!(
            store.claim_next_pending_for_worker(&w1, &caps, None, 30_000, 0),
            store.claim_next_pending_for_worker(&w2, &caps, None, 30_000, 0),
        );
        let claims = [a, b].into_iter().flatten().count();
        assert_eq!(claims, 1);
    }

    #[tokio::test]
    async fn capability_mismatch_is_not_claimed() {
        let store = InMemoryJobStore::new();
        let clock = FakeClock::new();
        let mut required = BTreeSet::new();
        required.insert("gpu".to_string());
        let mut job = sample_job(&clock);
        job.required_capabilities = required;
        store.create(job).await.unwrap();

        let worker = WorkerId::from_string("wkr-1");
        let claimed = store.claim_next_pending_for_worker(&worker, &BTreeSet::new(), None, 30_000, 0).await;
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn validate_attempt_fails_after_lease_lost_to_another_worker() {
        let store = InMemoryJobStore::new();
        let clock = FakeClock::new();
        let job = sample_job(&clock);
        let job_id = job.id.clone();
        store.create(job).await.unwrap();

        let w1 = WorkerId::from_string("wkr-1");
        store.claim_next_pending_for_worker(&w1, &BTreeSet::new(), None, 1_000, 0).await.unwrap();
        // Lease expires; reaper requeues; another worker claims it.
        store.requeue(&job_id, "lease expired", 0).await.unwrap();
        let w2 = WorkerId::from_string("wkr-2");
        store.claim_next_pending_for_worker(&w2, &BTreeSet::new(), None, 30_000, 5_000).await.unwrap();

        let err = store.validate_attempt(&w1, &job_id, 6_000).await.unwrap_err();
        assert!(matches!(err, JobStoreError::LeaseLost { .. }));
    }

    #[tokio::test]
    async fn requeue_with_backoff_window_is_not_claimable_until_it_elapses() {
        let store = InMemoryJobStore::new();
        let clock = FakeClock::new();
        let job = sample_job(&clock);
        let job_id = job.id.clone();
        store.create(job).await.unwrap();

        let w1 = WorkerId::from_string("wkr-1");
        store.claim_next_pending_for_worker(&w1, &BTreeSet::new(), None, 1_000, 0).await.unwrap();
        store.requeue(&job_id, "retryable failure", 10_000).await.unwrap();

        let w2 = WorkerId::from_string("wkr-2");
        assert!(store.claim_next_pending_for_worker(&w2, &BTreeSet::new(), None, 30_000, 9_999).await.is_none());
        let claimed = store.claim_next_pending_for_worker(&w2, &BTreeSet::new(), None, 30_000, 10_000).await;
        assert_eq!(claimed.unwrap().id, job_id);
    }

    #[tokio::test]
    async fn reaper_scan_finds_only_running_jobs_past_lease_expiry() {
        let store = InMemoryJobStore::new();
        let clock = FakeClock::new();
        let job = sample_job(&clock);
        let job_id = job.id.clone();
        store.create(job).await.unwrap();

        let worker = WorkerId::from_string("wkr-1");
        store.claim_next_pending_for_worker(&worker, &BTreeSet::new(), None, 1_000, 0).await.unwrap();

        assert!(store.list_running_with_expired_lease(500).await.is_empty());
        let expired = store.list_running_with_expired_lease(5_000).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, job_id);
    }
}
