// SPDX-License-Identifier: MIT

//! End-to-end scenarios that exercise the full stack (storage + engine +
//! daemon + adapters) together, rather than one crate's unit behavior.

use dar_adapters::{AdapterError, FakeAdapter};
use dar_core::clock::{Clock, FakeClock};
use dar_core::job::{Job, JobStatus};
use dar_core::task_graph::{Node, NodeKind, TaskGraph};
use dar_core::{Event, InvocationId, TenantId};
use dar_daemon::SignalBus;
use dar_engine::classifier::{CompensationRegistry, DefaultClassifier};
use dar_engine::executor::{StepExecutor, StepOutcome};
use dar_engine::policy::AllowAllPolicy;
use dar_engine::verifier::NoopVerifier;
use dar_storage::evidence;
use dar_storage::{
    EventLog, InMemoryCheckpointStore, InMemoryEffectStore, InMemoryEventLog, InMemoryJobStore, InMemoryLedger, JobStore,
    WakeupIndex,
};
use dar_core::InvocationRecord;
use dar_core::InvocationStatus;
use std::collections::BTreeSet;
use std::sync::Arc;

fn single_tool_graph(tool_name: &str) -> TaskGraph {
    TaskGraph::new(vec![Node {
        id: "n1".into(),
        kind: NodeKind::Tool { tool_name: tool_name.into(), args: serde_json::json!({}) },
        depends_on: vec![],
        required_capability: None,
    }])
}

struct Stack {
    executor: StepExecutor<FakeClock>,
    event_log: Arc<InMemoryEventLog>,
    job_store: Arc<InMemoryJobStore>,
    adapter: Arc<FakeAdapter>,
    wakeup: Arc<WakeupIndex>,
    clock: FakeClock,
}

async fn build_stack(task_graph: TaskGraph) -> (Stack, dar_core::JobId) {
    let clock = FakeClock::new();
    let event_log = Arc::new(InMemoryEventLog::new(|| "2026-01-01T00:00:00Z".to_string()));
    let job_store = Arc::new(InMemoryJobStore::new());
    let ledger = Arc::new(InMemoryLedger::new(|| 0));
    let effects = Arc::new(InMemoryEffectStore::new());
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let adapter = Arc::new(FakeAdapter::new());
    let wakeup = Arc::new(WakeupIndex::new(8));

    let executor = StepExecutor::new(
        event_log.clone(),
        job_store.clone(),
        ledger.clone(),
        effects,
        checkpoints,
        adapter.clone(),
        Arc::new(AllowAllPolicy),
        Arc::new(NoopVerifier),
        Arc::new(DefaultClassifier),
        CompensationRegistry::new(),
        clock.clone(),
    );

    let job = Job::builder(&clock).agent_id("agent-1").tenant_id(TenantId::from_string("ten-1")).goal("goal").build();
    let job_id = job.id.clone();
    job_store.create(job).await.unwrap();

    event_log
        .append(&job_id, 0, Event::JobCreated { id: job_id.clone(), agent_id: "agent-1".into(), tenant_id: "ten-1".into(), goal: "goal".into(), required_capabilities: vec![] })
        .await
        .unwrap();
    event_log.append(&job_id, 1, Event::PlanGenerated { task_graph: task_graph.clone(), goal: "goal".into() }).await.unwrap();

    (Stack { executor, event_log, job_store, adapter, wakeup, clock }, job_id)
}

/// Scenario 1: happy path, a single tool step runs once and the job completes.
#[tokio::test]
async fn happy_path_single_tool_step_completes() {
    let (stack, job_id) = build_stack(single_tool_graph("fetch")).await;
    stack.adapter.respond_with("fetch", serde_json::json!({"status": 200}));

    let worker_id = dar_core::WorkerId::from_string("wkr-1");
    stack.job_store.claim_next_pending_for_worker(&worker_id, &BTreeSet::new(), None, 60_000, stack.clock.epoch_ms()).await.unwrap();

    let outcome = stack.executor.run_job(&job_id, &worker_id).await.unwrap();
    assert_eq!(outcome, StepOutcome::JobCompleted);
    assert_eq!(stack.job_store.get(&job_id).await.unwrap().status, JobStatus::Completed);
    assert_eq!(stack.adapter.call_count(), 1);
}

/// Scenario 2: a worker crashes after Phase 1 (the effect is recorded, or an
/// adapter call started) but before the matching
/// `tool_invocation_finished`/`command_committed` pair lands — the next
/// worker to pick the job up must treat it as unrecoverable rather than
/// silently re-running a possibly-already-applied side effect.
#[tokio::test]
async fn crash_between_phases_surfaces_as_an_orphaned_invocation() {
    let (stack, job_id) = build_stack(single_tool_graph("charge_card")).await;
    let worker_id = dar_core::WorkerId::from_string("wkr-1");
    stack.job_store.claim_next_pending_for_worker(&worker_id, &BTreeSet::new(), None, 60_000, stack.clock.epoch_ms()).await.unwrap();

    // Simulate the crash: a started invocation made it into the log, but the
    // worker died before appending `tool_invocation_finished`.
    let task_graph = single_tool_graph("charge_card");
    let plan_decision_id = dar_core::ids::plan_decision_id(&task_graph.canonical_bytes());
    let step_id = dar_core::ids::step_id(&job_id, &plan_decision_id, 0, "tool");
    let idempotency_key = dar_core::hash::idempotency_key(job_id.as_str(), step_id.as_str(), "charge_card", &serde_json::json!({}));

    let (_, version) = stack.event_log.list_events(&job_id).await;
    stack
        .event_log
        .append(
            &job_id,
            version,
            Event::ToolInvocationStarted { invocation_id: InvocationId::new(), tool_name: "charge_card".into(), arguments_hash: "h".into(), idempotency_key, started_at_epoch_ms: 0 },
        )
        .await
        .unwrap();

    // A second worker (or the same one after restart) picks up where the
    // crashed attempt left off and must refuse to proceed automatically.
    let err = stack.executor.run_job(&job_id, &worker_id).await.unwrap_err();
    assert!(matches!(err, dar_core::RuntimeError::OrphanedInvocation { .. }));
    assert_eq!(stack.job_store.get(&job_id).await.unwrap().status, JobStatus::Failed);
    // The adapter was never actually invoked for the recovery attempt.
    assert_eq!(stack.adapter.call_count(), 0);
}

/// Scenario 3: two workers race to claim the same pending job; exactly one
/// wins, and the job ends up Running under that worker's lease.
#[tokio::test]
async fn two_workers_racing_to_claim_only_one_wins() {
    let (stack, job_id) = build_stack(single_tool_graph("noop")).await;
    let job_store = stack.job_store.clone();
    let clock = stack.clock.clone();

    let worker_a = dar_core::WorkerId::from_string("wkr-a");
    let worker_b = dar_core::WorkerId::from_string("wkr-b");

    let (store_a, store_b) = (job_store.clone(), job_store.clone());
    let (a, b) = (worker_a.clone(), worker_b.clone());
    let now = clock.epoch_ms();
    let handle_a = tokio::spawn(async move { store_a.claim_next_pending_for_worker(&a, &BTreeSet::new(), None, 30_000, now).await });
    let handle_b = tokio::spawn(async move { store_b.claim_next_pending_for_worker(&b, &BTreeSet::new(), None, 30_000, now).await });

    let (claimed_a, claimed_b) = (handle_a.await.unwrap(), handle_b.await.unwrap());
    let winners = [claimed_a, claimed_b].into_iter().flatten().count();
    assert_eq!(winners, 1, "exactly one of the two racing claims should succeed");

    let job = job_store.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    let holder = job.lease.as_ref().unwrap().holder.clone();
    assert!(holder == worker_a || holder == worker_b);
}

/// Scenario 4: an approval node suspends the job, and the signal bus
/// delivering the approval is what unblocks it for the next worker to
/// complete.
#[tokio::test]
async fn approval_wait_then_resume_via_signal_bus() {
    let task_graph = TaskGraph::new(vec![Node {
        id: "n1".into(),
        kind: NodeKind::Approval { correlation_key: "ck-deploy".into(), reason: Some("prod deploy".into()) },
        depends_on: vec![],
        required_capability: None,
    }]);
    let (stack, job_id) = build_stack(task_graph).await;
    let worker_id = dar_core::WorkerId::from_string("wkr-1");
    stack.job_store.claim_next_pending_for_worker(&worker_id, &BTreeSet::new(), None, 60_000, stack.clock.epoch_ms()).await.unwrap();

    let outcome = stack.executor.run_job(&job_id, &worker_id).await.unwrap();
    assert_eq!(outcome, StepOutcome::Waiting { correlation_key: "ck-deploy".to_string() });
    assert_eq!(stack.job_store.get(&job_id).await.unwrap().status, JobStatus::Waiting);

    let bus = SignalBus::new(stack.event_log.clone(), stack.job_store.clone(), stack.wakeup.clone());
    bus.signal(&job_id, "ck-deploy", serde_json::json!({"approved_by": "ops-lead"})).await.unwrap();
    assert_eq!(stack.wakeup.receive(std::time::Duration::from_millis(100)).await, Some(job_id.clone()));
    assert_eq!(stack.job_store.get(&job_id).await.unwrap().status, JobStatus::Pending);

    stack.job_store.claim_next_pending_for_worker(&worker_id, &BTreeSet::new(), None, 60_000, stack.clock.epoch_ms()).await;
    let outcome = stack.executor.run_job(&job_id, &worker_id).await.unwrap();
    assert_eq!(outcome, StepOutcome::JobCompleted);
}

/// Scenario 5: a retryable failure requeues the job with its retry counter
/// incremented rather than failing it outright, and the next attempt
/// succeeds once the transient condition clears.
#[tokio::test]
async fn retryable_failure_backs_off_then_succeeds_on_retry() {
    let (stack, job_id) = build_stack(single_tool_graph("flaky_call")).await;
    let worker_id = dar_core::WorkerId::from_string("wkr-1");
    stack.job_store.claim_next_pending_for_worker(&worker_id, &BTreeSet::new(), None, 60_000, stack.clock.epoch_ms()).await.unwrap();

    let failed_at = stack.clock.epoch_ms();
    stack.adapter.fail_with("flaky_call", AdapterError::Timeout { tool_name: "flaky_call".into(), timeout_ms: 5_000 });
    let outcome = stack.executor.run_job(&job_id, &worker_id).await.unwrap();
    assert_eq!(outcome, StepOutcome::Requeued);
    let job = stack.job_store.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 1);

    let backoff = dar_core::RetryPolicy::default().backoff_for_attempt(0);

    // Before the backoff window elapses the job is not yet eligible, even
    // though it's Pending — the claim scan must respect `not_before_epoch_ms`.
    let too_soon = stack.job_store.claim_next_pending_for_worker(&worker_id, &BTreeSet::new(), None, 60_000, failed_at + backoff.as_millis() as u64 - 1).await;
    assert!(too_soon.is_none());

    stack.clock.advance(backoff);
    assert_eq!(stack.clock.epoch_ms(), failed_at + backoff.as_millis() as u64);
    stack.adapter.respond_with("flaky_call", serde_json::json!({"status": "ok"}));
    let claimed = stack.job_store.claim_next_pending_for_worker(&worker_id, &BTreeSet::new(), None, 60_000, stack.clock.epoch_ms()).await;
    assert_eq!(claimed.unwrap().id, job_id);

    let outcome = stack.executor.run_job(&job_id, &worker_id).await.unwrap();
    assert_eq!(outcome, StepOutcome::JobCompleted);
    assert_eq!(stack.job_store.get(&job_id).await.unwrap().status, JobStatus::Completed);
}

/// Scenario 6: export a completed job's evidence archive, confirm it
/// verifies clean, then tamper with the archive bytes and confirm
/// verification catches it.
#[tokio::test]
async fn tampered_evidence_archive_fails_verification() {
    let (stack, job_id) = build_stack(single_tool_graph("echo")).await;
    let worker_id = dar_core::WorkerId::from_string("wkr-1");
    stack.job_store.claim_next_pending_for_worker(&worker_id, &BTreeSet::new(), None, 60_000, stack.clock.epoch_ms()).await.unwrap();
    stack.adapter.respond_with("echo", serde_json::json!("done"));
    let outcome = stack.executor.run_job(&job_id, &worker_id).await.unwrap();
    assert_eq!(outcome, StepOutcome::JobCompleted);

    let (events, _) = stack.event_log.list_events(&job_id).await;
    let finished = events
        .iter()
        .find_map(|e| match &e.event {
            Event::ToolInvocationFinished { invocation_id, idempotency_key, .. } => Some((invocation_id.clone(), idempotency_key.clone())),
            _ => None,
        })
        .unwrap();

    let ledger_rows = vec![InvocationRecord {
        invocation_id: finished.0,
        job_id: job_id.clone(),
        step_id: dar_core::StepId::from_string("stp-1"),
        tool_name: "echo".into(),
        arguments_hash: "hash".into(),
        idempotency_key: finished.1,
        status: InvocationStatus::Success,
        result: Some(serde_json::json!("done")),
        committed: true,
        started_at_epoch_ms: 0,
        finished_at_epoch_ms: Some(1),
        external_id: None,
    }];

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evidence.zip");
    evidence::export(&path, &job_id, &events, &ledger_rows, 99_999).unwrap();

    let report = evidence::verify(&path).unwrap();
    assert!(report.ok, "unexpected failures: {:?}", report.failures);

    let bytes = std::fs::read(&path).unwrap();
    let mut mutated = bytes.clone();
    let flip_at = mutated.len() - 5;
    mutated[flip_at] ^= 0xFF;
    std::fs::write(&path, mutated).unwrap();

    let tampered = evidence::verify(&path);
    assert!(tampered.is_err() || !tampered.unwrap().ok);
}
