// SPDX-License-Identifier: MIT

//! Worker pool entry point: registers a single worker process, runs its
//! claim loop alongside the lease reaper, and drains in-flight jobs on
//! Ctrl-C before exiting.

use dar_adapters::tool::ToolAdapter;
use dar_core::clock::{Clock, SystemClock};
use dar_core::WorkerId;
use dar_daemon::{Reaper, WorkerPool, WorkerRegistry};
use dar_engine::{AllowAllPolicy, CompensationRegistry, DefaultClassifier, NoopVerifier, StepExecutor};
use dar_storage::{InMemoryCheckpointStore, InMemoryEffectStore, InMemoryEventLog, InMemoryJobStore, InMemoryLedger, WakeupIndex};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// No tool adapters are wired by default — a deployment links in the
/// adapters its agents actually need (HTTP, shell, whatever) and passes them
/// here instead.
struct UnimplementedAdapter;

#[async_trait::async_trait]
impl ToolAdapter for UnimplementedAdapter {
    async fn invoke(
        &self,
        tool_name: &str,
        _args: &serde_json::Value,
        _ctx: &dar_core::StepContext,
    ) -> Result<dar_adapters::AdapterOutput, dar_adapters::AdapterError> {
        Err(dar_adapters::AdapterError::UnknownTool(tool_name.to_string()))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let clock = SystemClock;
    let event_log = Arc::new(InMemoryEventLog::default());
    let job_store = Arc::new(InMemoryJobStore::new());
    let ledger = Arc::new(InMemoryLedger::new(move || clock.epoch_ms()));
    let effects = Arc::new(InMemoryEffectStore::new());
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let wakeup = Arc::new(WakeupIndex::default());
    let registry = Arc::new(WorkerRegistry::new());

    let executor = Arc::new(StepExecutor::new(
        event_log,
        job_store.clone(),
        ledger,
        effects,
        checkpoints,
        Arc::new(UnimplementedAdapter),
        Arc::new(AllowAllPolicy),
        Arc::new(NoopVerifier),
        Arc::new(DefaultClassifier),
        CompensationRegistry::new(),
        clock,
    ));

    let worker_id = std::env::var("DAR_WORKER_ID").map(WorkerId::from_string).unwrap_or_else(|_| WorkerId::new());
    let pool = Arc::new(WorkerPool::new(executor, job_store.clone(), wakeup, registry.clone(), clock, worker_id.clone(), BTreeSet::new(), None));
    let reaper = Reaper::new(job_store, registry, clock);

    let shutdown = CancellationToken::new();
    let pool_handle = tokio::spawn({
        let pool = pool.clone();
        let shutdown = shutdown.clone();
        async move { pool.run(shutdown).await }
    });
    let reaper_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { reaper.run(shutdown).await }
    });

    tracing::info!(worker_id = %worker_id, "worker started");
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, draining in-flight jobs");
    shutdown.cancel();
    let _ = tokio::join!(pool_handle, reaper_handle);
}
