// SPDX-License-Identifier: MIT

//! The worker pool's claim loop, lease renewer, and reaper.
//!
//! Each [`WorkerPool`] models one worker process: it registers itself,
//! heartbeats, claims ready jobs up to a concurrency limit, and drives each
//! claimed job through the executor under a lease kept alive by a per-job
//! renewal task. A [`Reaper`] runs independently, requeuing jobs whose lease
//! has expired and whose holder has gone quiet.

use crate::env;
use crate::worker_registry::WorkerRegistry;
use dar_core::clock::Clock;
use dar_core::job::Job;
use dar_core::{JobId, TenantId, WorkerId};
use dar_engine::StepExecutor;
use dar_storage::{JobStore, SharedJobStore, WakeupIndex};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct WorkerPool<C: Clock> {
    executor: Arc<StepExecutor<C>>,
    job_store: SharedJobStore,
    wakeup: Arc<WakeupIndex>,
    registry: Arc<WorkerRegistry>,
    clock: C,
    worker_id: WorkerId,
    capabilities: BTreeSet<String>,
    tenant: Option<TenantId>,
}

impl<C: Clock> WorkerPool<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executor: Arc<StepExecutor<C>>,
        job_store: SharedJobStore,
        wakeup: Arc<WakeupIndex>,
        registry: Arc<WorkerRegistry>,
        clock: C,
        worker_id: WorkerId,
        capabilities: BTreeSet<String>,
        tenant: Option<TenantId>,
    ) -> Self {
        Self { executor, job_store, wakeup, registry, clock, worker_id, capabilities, tenant }
    }

    /// Run the claim loop until `shutdown` fires and every in-flight job has
    /// finished its current attempt.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.registry.register(self.worker_id.clone(), self.capabilities.clone(), self.clock.epoch_ms());
        let limit = env::concurrency().max(1);
        let mut in_flight = tokio::task::JoinSet::new();
        let mut heartbeat = tokio::time::interval(env::heartbeat_interval());

        loop {
            while in_flight.len() < limit && !shutdown.is_cancelled() {
                match self.try_claim().await {
                    Some(job) => {
                        let pool = self.clone();
                        in_flight.spawn(async move { pool.drive_job(job).await });
                    }
                    None => break,
                }
            }

            if shutdown.is_cancelled() && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                _ = heartbeat.tick() => {
                    self.registry.heartbeat(&self.worker_id, self.clock.epoch_ms());
                }
                Some(res) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = res {
                        tracing::warn!(error = %err, worker_id = %self.worker_id, "job task panicked");
                    }
                }
                _ = self.wakeup.receive(env::poll_timeout()), if in_flight.is_empty() => {}
                _ = shutdown.cancelled(), if in_flight.is_empty() => {}
            }
        }

        self.registry.deregister(&self.worker_id);
    }

    async fn try_claim(&self) -> Option<Job> {
        let now = self.clock.epoch_ms();
        self.job_store.claim_next_pending_for_worker(&self.worker_id, &self.capabilities, self.tenant.as_ref(), env::lease_ttl_ms(), now).await
    }

    async fn drive_job(self: Arc<Self>, job: Job) {
        let job_id = job.id.clone();
        let renew_token = CancellationToken::new();
        let renewer = {
            let pool = self.clone();
            let job_id = job_id.clone();
            let token = renew_token.clone();
            tokio::spawn(async move { pool.renew_lease_loop(job_id, token).await })
        };

        let result = self.executor.run_job(&job_id, &self.worker_id).await;
        renew_token.cancel();
        let _ = renewer.await;

        match result {
            Ok(outcome) => tracing::info!(job_id = %job_id, worker_id = %self.worker_id, outcome = ?outcome, "job attempt finished"),
            Err(err) => tracing::warn!(job_id = %job_id, worker_id = %self.worker_id, error = %err, "job attempt failed"),
        }
    }

    /// Renews the job's lease every `ttl / 3` until cancelled or a renewal
    /// fails (another worker took it, or the row is gone).
    async fn renew_lease_loop(&self, job_id: JobId, token: CancellationToken) {
        let mut interval = tokio::time::interval(env::lease_renewal_interval());
        interval.tick().await; // claim already installed the first lease
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = interval.tick() => {
                    let now = self.clock.epoch_ms();
                    if let Err(err) = self.job_store.renew_lease(&self.worker_id, &job_id, env::lease_ttl_ms(), now).await {
                        tracing::warn!(job_id = %job_id, worker_id = %self.worker_id, error = %err, "lease renewal failed");
                        return;
                    }
                }
            }
        }
    }
}

/// Scans for jobs whose lease has expired and whose holder has stopped
/// heartbeating, then requeues them: `Running -> Pending`, `retry_count++`,
/// `job_requeued` appended.
pub struct Reaper<C: Clock> {
    job_store: SharedJobStore,
    registry: Arc<WorkerRegistry>,
    clock: C,
}

impl<C: Clock> Reaper<C> {
    pub fn new(job_store: SharedJobStore, registry: Arc<WorkerRegistry>, clock: C) -> Self {
        Self { job_store, registry, clock }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(env::reaper_interval());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.sweep().await,
            }
        }
    }

    /// One reaper pass; exposed separately so tests can drive it without a
    /// real timer.
    pub async fn sweep(&self) {
        let now = self.clock.epoch_ms();
        let stale_after_ms = env::heartbeat_stale_after().as_millis() as u64;
        for job in self.job_store.list_running_with_expired_lease(now).await {
            let holder_is_stale = job.lease.as_ref().is_some_and(|lease| self.registry.is_stale(&lease.holder, now, stale_after_ms));
            if !holder_is_stale {
                continue;
            }
            if let Err(err) = self.job_store.requeue(&job.id, "lease expired and holder heartbeat stale", 0).await {
                tracing::warn!(job_id = %job.id, error = %err, "reaper requeue failed");
            } else {
                tracing::info!(job_id = %job.id, "reaper requeued job with expired lease");
            }
        }
    }
}
