// SPDX-License-Identifier: MIT

//! Step Executor: walks a job's task graph in deterministic
//! topological order, consulting the ledger and effect store to decide
//! execute-vs-inject per step, and driving the two-phase commit around each
//! adapter invocation.

use crate::classifier::{CompensationRegistry, ErrorClassifier};
use crate::policy::CapabilityPolicy;
use crate::replay;
use crate::verifier::{ResourceVerifier, VerifyOutcome};
use dar_adapters::{AdapterError, ToolAdapter};
use dar_core::clock::Clock;
use dar_core::errors::StepFailureClass;
use dar_core::event::{Event, InvocationOutcome, ResultType, WaitKind};
use dar_core::execution_state::ExecutionState;
use dar_core::invocation::InvocationStatus;
use dar_core::job::{Job, JobStatus};
use dar_core::task_graph::{Node, NodeKind, TaskGraph};
use dar_core::{Checkpoint, CheckpointId, CommandId, EffectKind, EffectRecord, JobId, RetryPolicy, RuntimeError, StepContext, StepId, WorkerId};
use dar_storage::{AcquireDecision, CheckpointStore, EffectStore, EventLog, InvocationLedger, JobStore, SharedCheckpointStore, SharedEffectStore, SharedEventLog, SharedJobStore, SharedLedger, StoredEvent};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What happened to a job after one `run_job` call. A caller (the worker
/// loop, or a test) decides what to do next: `Requeued`/`Waiting` mean the
/// worker should release its lease and move on.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Advanced,
    Waiting { correlation_key: String },
    Requeued,
    JobFailed { reason: String },
    JobCompleted,
}

pub struct StepExecutor<C: Clock> {
    event_log: SharedEventLog,
    job_store: SharedJobStore,
    ledger: SharedLedger,
    effects: SharedEffectStore,
    checkpoints: SharedCheckpointStore,
    adapter: Arc<dyn ToolAdapter>,
    policy: Arc<dyn CapabilityPolicy>,
    verifier: Arc<dyn ResourceVerifier>,
    classifier: Arc<dyn ErrorClassifier>,
    compensations: CompensationRegistry,
    clock: C,
}

impl<C: Clock> StepExecutor<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_log: SharedEventLog,
        job_store: SharedJobStore,
        ledger: SharedLedger,
        effects: SharedEffectStore,
        checkpoints: SharedCheckpointStore,
        adapter: Arc<dyn ToolAdapter>,
        policy: Arc<dyn CapabilityPolicy>,
        verifier: Arc<dyn ResourceVerifier>,
        classifier: Arc<dyn ErrorClassifier>,
        compensations: CompensationRegistry,
        clock: C,
    ) -> Self {
        Self { event_log, job_store, ledger, effects, checkpoints, adapter, policy, verifier, classifier, compensations, clock }
    }

    /// Advance `job_id` as far as it will go under `worker_id`'s lease: runs
    /// every not-yet-completed step in topological order until the job
    /// completes, suspends on a wait, requeues after a retryable failure, or
    /// fails permanently.
    pub async fn run_job(&self, job_id: &JobId, worker_id: &WorkerId) -> Result<StepOutcome, RuntimeError> {
        self.job_store.validate_attempt(worker_id, job_id, self.clock.epoch_ms()).await?;

        let job = self.job_store.get(job_id).await?;
        let (mut events, mut version) = self.event_log.list_events(job_id).await;
        let mut state = replay::replay(&events);

        let task_graph = state.task_graph.clone().ok_or_else(|| RuntimeError::Unplanned(job_id.to_string()))?;
        let order = task_graph.topological_order().map_err(|e| RuntimeError::InvalidTaskGraph(e.to_string()))?;
        let plan_decision_id = dar_core::ids::plan_decision_id(&task_graph.canonical_bytes());

        for (index, node) in order.iter().enumerate() {
            if state.is_node_completed(&node.id) {
                continue;
            }
            let step_id = dar_core::ids::step_id(job_id, &plan_decision_id, index, node.kind.type_tag());
            let outcome =
                self.execute_step(&job, &state, &events, &task_graph, &step_id, node, job_id, worker_id, &mut version).await?;
            match outcome {
                StepOutcome::Advanced => {
                    let (fresh_events, fresh_version) = self.event_log.list_events(job_id).await;
                    events = fresh_events;
                    version = fresh_version;
                    state = replay::replay(&events);
                }
                other => return Ok(other),
            }
        }

        self.job_store.validate_attempt(worker_id, job_id, self.clock.epoch_ms()).await?;
        self.event_log.append(job_id, version, Event::JobCompleted { id: job_id.clone() }).await?;
        self.job_store.update_status(job_id, JobStatus::Completed).await?;
        Ok(StepOutcome::JobCompleted)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_step(
        &self,
        job: &Job,
        state: &ExecutionState,
        events: &[StoredEvent],
        task_graph: &TaskGraph,
        step_id: &StepId,
        node: &Node,
        job_id: &JobId,
        worker_id: &WorkerId,
        version: &mut u64,
    ) -> Result<StepOutcome, RuntimeError> {
        let attempt = events.iter().filter(|e| matches!(&e.event, Event::NodeStarted { node_id, .. } if node_id == &node.id)).count() as u32 + 1;
        *version = self.event_log.append(job_id, *version, Event::NodeStarted { node_id: node.id.clone(), attempt, worker_id: worker_id.to_string() }).await?;

        if node.kind.is_wait_like() {
            return self.execute_wait_like(state, step_id, node, job_id, version).await;
        }

        let (tool_name, args) = tool_name_and_args(&node.kind);
        let args_hash = dar_core::hash::hash_bytes(dar_core::hash::canonical_json(&args).as_bytes());
        let idempotency_key = dar_core::hash::idempotency_key(job_id.as_str(), step_id.as_str(), &tool_name, &args);

        if state.is_orphaned_invocation(&idempotency_key) {
            self.append_node_finished(job_id, step_id, node, &serde_json::Value::Null, 0, ResultType::PermanentFailure, Some(format!("orphaned invocation for idempotency key {idempotency_key}")), version).await?;
            self.job_store.update_status(job_id, JobStatus::Failed).await?;
            self.event_log.append(job_id, *version, Event::JobFailed { id: job_id.clone(), reason: "orphaned invocation requires manual intervention".to_string() }).await.ok();
            return Err(RuntimeError::OrphanedInvocation { idempotency_key });
        }

        let replay_result = state.completed_tool_invocations.get(&idempotency_key).cloned();
        let decision = self.ledger.acquire(job_id, step_id, &tool_name, &args_hash, &idempotency_key, replay_result).await;

        match decision {
            AcquireDecision::ReturnRecordedResult { result } => {
                for change in replay::state_changes_for_step(state, step_id.as_str()) {
                    if let VerifyOutcome::Missing { reason } = self.verifier.verify(job_id.as_str(), step_id.as_str(), change) {
                        self.append_node_finished(job_id, step_id, node, &serde_json::Value::Null, 0, ResultType::PermanentFailure, Some(reason.clone()), version).await?;
                        self.job_store.update_status(job_id, JobStatus::Failed).await?;
                        self.event_log.append(job_id, *version, Event::JobFailed { id: job_id.clone(), reason: reason.clone() }).await.ok();
                        return Err(RuntimeError::ResourceVerificationFailed { step_id: step_id.to_string(), reason });
                    }
                }
                self.job_store.validate_attempt(worker_id, job_id, self.clock.epoch_ms()).await?;
                self.append_node_finished(job_id, step_id, node, &result, 0, ResultType::SideEffectCommitted, None, version).await?;
                Ok(StepOutcome::Advanced)
            }
            AcquireDecision::WaitOtherWorker => Err(RuntimeError::WaitOtherWorker { idempotency_key }),
            AcquireDecision::AllowExecute { invocation_id } => {
                self.execute_allowed(job, state, task_graph, step_id, node, job_id, worker_id, &tool_name, &args, &args_hash, &idempotency_key, invocation_id, events, version).await
            }
        }
    }

    async fn execute_wait_like(&self, state: &ExecutionState, step_id: &StepId, node: &Node, job_id: &JobId, version: &mut u64) -> Result<StepOutcome, RuntimeError> {
        let correlation_key = match &node.kind {
            NodeKind::Approval { correlation_key, .. } => correlation_key.clone(),
            _ => format!("{}:{}", job_id.as_str(), node.id),
        };
        let wait_kind = match &node.kind {
            NodeKind::Wait { .. } => WaitKind::Wait,
            NodeKind::Approval { .. } => WaitKind::Approval,
            NodeKind::Condition { .. } => WaitKind::Condition,
            _ => unreachable!("is_wait_like guarantees one of the three variants above"),
        };

        if let Some(payload) = state.resolved_signals.get(&correlation_key).cloned() {
            self.append_node_finished(job_id, step_id, node, &payload, 0, ResultType::Pure, None, version).await?;
            return Ok(StepOutcome::Advanced);
        }

        let reason = match &node.kind {
            NodeKind::Wait { reason } => reason.clone(),
            NodeKind::Approval { reason, .. } => reason.clone(),
            NodeKind::Condition { expression } => Some(expression.clone()),
            _ => None,
        };
        *version = self
            .event_log
            .append(
                job_id,
                *version,
                Event::JobWaiting { node_id: node.id.clone(), wait_kind, reason, expires_at_epoch_ms: None, correlation_key: correlation_key.clone(), resumption_context: HashMap::new() },
            )
            .await?;
        self.job_store.update_status(job_id, JobStatus::Waiting).await?;
        Ok(StepOutcome::Waiting { correlation_key })
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_allowed(
        &self,
        job: &Job,
        state: &ExecutionState,
        task_graph: &TaskGraph,
        step_id: &StepId,
        node: &Node,
        job_id: &JobId,
        worker_id: &WorkerId,
        tool_name: &str,
        args: &serde_json::Value,
        args_hash: &str,
        idempotency_key: &str,
        invocation_id: dar_core::InvocationId,
        events: &[StoredEvent],
        version: &mut u64,
    ) -> Result<StepOutcome, RuntimeError> {
        let approved_keys: HashSet<String> = state.resolved_signals.keys().cloned().collect();
        let capability = node.required_capability.as_deref();
        let policy_decision = self.policy.check(job, tool_name, capability, idempotency_key, &approved_keys);

        if !policy_decision.allowed {
            self.ledger.record_failure(job_id, idempotency_key, InvocationStatus::Failure).await?;
            self.append_node_finished(job_id, step_id, node, &serde_json::Value::Null, 0, ResultType::PermanentFailure, Some("capability policy denied".to_string()), version).await?;
            self.job_store.update_status(job_id, JobStatus::Failed).await?;
            self.event_log.append(job_id, *version, Event::JobFailed { id: job_id.clone(), reason: "capability policy denied".to_string() }).await.ok();
            return Ok(StepOutcome::JobFailed { reason: "capability policy denied".to_string() });
        }

        if policy_decision.require_approval && !approved_keys.contains(idempotency_key) {
            *version = self
                .event_log
                .append(
                    job_id,
                    *version,
                    Event::JobWaiting {
                        node_id: node.id.clone(),
                        wait_kind: WaitKind::Approval,
                        reason: Some("capability requires approval".to_string()),
                        expires_at_epoch_ms: None,
                        correlation_key: idempotency_key.to_string(),
                        resumption_context: HashMap::new(),
                    },
                )
                .await?;
            self.job_store.update_status(job_id, JobStatus::Waiting).await?;
            return Ok(StepOutcome::Waiting { correlation_key: idempotency_key.to_string() });
        }

        self.job_store.validate_attempt(worker_id, job_id, self.clock.epoch_ms()).await?;

        let started_at_epoch_ms = self.clock.epoch_ms();
        let ctx = StepContext::live(job_id.clone(), step_id.clone());
        let call_start = std::time::Instant::now();
        let invocation = self.adapter.invoke(tool_name, args, &ctx).await;

        match invocation {
            Ok(output) => {
                self.job_store.validate_attempt(worker_id, job_id, self.clock.epoch_ms()).await?;

                let command_id = CommandId::new();
                let effect_kind = match &node.kind {
                    NodeKind::Llm { .. } => EffectKind::Llm,
                    _ => EffectKind::Tool,
                };
                let mut metadata = HashMap::new();
                let recorded = ctx.recorded_calls();
                if !recorded.is_empty() {
                    metadata.insert("determinism_calls".to_string(), serde_json::to_string(&recorded).unwrap_or_default());
                }
                self.effects
                    .put_effect(EffectRecord {
                        job_id: job_id.clone(),
                        command_id: command_id.clone(),
                        idempotency_key: idempotency_key.to_string(),
                        kind: effect_kind,
                        input: args.clone(),
                        output: Some(output.result.clone()),
                        error: None,
                        metadata,
                        created_at_epoch_ms: self.clock.epoch_ms(),
                    })
                    .await;

                *version = self
                    .event_log
                    .append(job_id, *version, Event::ToolInvocationStarted { invocation_id: invocation_id.clone(), tool_name: tool_name.to_string(), arguments_hash: args_hash.to_string(), idempotency_key: idempotency_key.to_string(), started_at_epoch_ms })
                    .await?;
                *version = self
                    .event_log
                    .append(job_id, *version, Event::CommandEmitted { node_id: node.id.clone(), command_id: command_id.clone(), kind: tool_name.to_string(), input: args.clone() })
                    .await?;
                let finished_at_epoch_ms = self.clock.epoch_ms();
                *version = self
                    .event_log
                    .append(
                        job_id,
                        *version,
                        Event::ToolInvocationFinished { invocation_id, idempotency_key: idempotency_key.to_string(), outcome: InvocationOutcome::Success, result: Some(output.result.clone()), error: None, finished_at_epoch_ms },
                    )
                    .await?;
                *version = self
                    .event_log
                    .append(job_id, *version, Event::CommandCommitted { node_id: node.id.clone(), command_id: command_id.clone(), result: output.result.clone(), input_hash: args_hash.to_string() })
                    .await?;
                for change in &output.state_changes {
                    *version = self
                        .event_log
                        .append(
                            job_id,
                            *version,
                            Event::StateChanged {
                                resource_type: change.resource_type.clone(),
                                resource_id: change.resource_id.clone(),
                                operation: change.operation.clone(),
                                step_id: step_id.clone(),
                                tool_name: tool_name.to_string(),
                                version: change.version.clone(),
                                etag: change.etag.clone(),
                                external_ref: change.external_ref.clone(),
                            },
                        )
                        .await?;
                }
                let duration_ms = call_start.elapsed().as_millis() as u64;
                self.append_node_finished(job_id, step_id, node, &output.result, duration_ms, ResultType::SideEffectCommitted, None, version).await?;

                self.ledger.commit(job_id, idempotency_key, output.result.clone()).await?;
                self.checkpoint_after(job, job_id, node, task_graph, version).await;
                Ok(StepOutcome::Advanced)
            }
            Err(err) => self.handle_failure(job, state, events, task_graph, job_id, step_id, node, tool_name, idempotency_key, &err, version).await,
        }
    }

    async fn append_node_finished(
        &self,
        job_id: &JobId,
        step_id: &StepId,
        node: &Node,
        payload_results: &serde_json::Value,
        duration_ms: u64,
        result_type: ResultType,
        reason: Option<String>,
        version: &mut u64,
    ) -> Result<(), RuntimeError> {
        let input_hash = dar_core::hash::hash_bytes(dar_core::hash::canonical_json(&serde_json::to_value(&node.kind).unwrap_or(serde_json::Value::Null)).as_bytes());
        *version = self
            .event_log
            .append(
                job_id,
                *version,
                Event::NodeFinished { node_id: node.id.clone(), step_id: step_id.clone(), payload_results: payload_results.clone(), duration_ms, attempt: 1, result_type, reason, input_hash },
            )
            .await?;
        Ok(())
    }

    /// Checkpoint after every successful non-wait step; `state_checkpointed`
    /// is emitted unconditionally, not selectively.
    async fn checkpoint_after(&self, job: &Job, job_id: &JobId, node: &Node, task_graph: &TaskGraph, version: &mut u64) {
        let checkpoint = Checkpoint {
            id: CheckpointId::new(),
            agent_id: job.agent_id.clone(),
            job_id: job_id.clone(),
            cursor_node: node.id.clone(),
            task_graph_bytes: task_graph.canonical_bytes(),
            payload_results_bytes: Vec::new(),
            created_at_epoch_ms: self.clock.epoch_ms(),
        };
        let checkpoint_id = checkpoint.id.clone();
        self.checkpoints.save(checkpoint).await;
        let _ = self.job_store.update_cursor(job_id, checkpoint_id.as_str()).await;

        if let Ok(new_version) = self
            .event_log
            .append(job_id, *version, Event::StateCheckpointed { node_id: node.id.clone(), state_before: serde_json::Value::Null, state_after: serde_json::json!({"cursor_node": node.id}), changed_keys: vec![node.id.clone()] })
            .await
        {
            *version = new_version;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_failure(
        &self,
        job: &Job,
        state: &ExecutionState,
        events: &[StoredEvent],
        task_graph: &TaskGraph,
        job_id: &JobId,
        step_id: &StepId,
        node: &Node,
        tool_name: &str,
        idempotency_key: &str,
        err: &AdapterError,
        version: &mut u64,
    ) -> Result<StepOutcome, RuntimeError> {
        let class = self.classifier.classify(tool_name, err);
        self.ledger.record_failure(job_id, idempotency_key, InvocationStatus::Failure).await?;

        let result_type = match class {
            StepFailureClass::Retryable => ResultType::RetryableFailure,
            StepFailureClass::Permanent => ResultType::PermanentFailure,
            StepFailureClass::Compensatable => ResultType::CompensatableFailure,
        };
        self.append_node_finished(job_id, step_id, node, &serde_json::Value::Null, 0, result_type, Some(err.to_string()), version).await?;

        if matches!(class, StepFailureClass::Compensatable) {
            self.run_compensations(job_id, task_graph, events, state, version).await?;
        }

        match class {
            StepFailureClass::Retryable => {
                let policy = RetryPolicy::default();
                if policy.exhausted(job.retry_count) || !policy.matches(&err.to_string()) {
                    self.job_store.update_status(job_id, JobStatus::Failed).await?;
                    self.event_log.append(job_id, *version, Event::JobFailed { id: job_id.clone(), reason: err.to_string() }).await.ok();
                    Ok(StepOutcome::JobFailed { reason: err.to_string() })
                } else {
                    let not_before = self.clock.epoch_ms() + policy.backoff_for_attempt(job.retry_count).as_millis() as u64;
                    self.event_log.append(job_id, *version, Event::JobRequeued { id: job_id.clone(), reason: err.to_string() }).await.ok();
                    self.job_store.requeue(job_id, &err.to_string(), not_before).await?;
                    Ok(StepOutcome::Requeued)
                }
            }
            _ => {
                self.job_store.update_status(job_id, JobStatus::Failed).await?;
                self.event_log.append(job_id, *version, Event::JobFailed { id: job_id.clone(), reason: err.to_string() }).await.ok();
                Ok(StepOutcome::JobFailed { reason: err.to_string() })
            }
        }
    }

    /// Reverse-topological compensation for already-committed steps.
    async fn run_compensations(&self, job_id: &JobId, task_graph: &TaskGraph, events: &[StoredEvent], state: &ExecutionState, version: &mut u64) -> Result<(), RuntimeError> {
        let order = task_graph.topological_order().map_err(|e| RuntimeError::InvalidTaskGraph(e.to_string()))?;
        for node in order.into_iter().rev() {
            if !state.is_node_completed(&node.id) {
                continue;
            }
            let NodeKind::Tool { tool_name, .. } = &node.kind else { continue };
            let Some(handler) = self.compensations.get(tool_name) else { continue };

            let commit = events.iter().rev().find_map(|e| match &e.event {
                Event::CommandCommitted { node_id, command_id, result, .. } if node_id == &node.id => Some((command_id.clone(), result.clone())),
                _ => None,
            });
            let Some((command_id, result)) = commit else { continue };

            if handler.compensate(job_id, &node.id, &command_id, &result).await.is_ok() {
                let step_id = events
                    .iter()
                    .find_map(|e| match &e.event {
                        Event::NodeFinished { node_id, step_id, .. } if node_id == &node.id => Some(step_id.clone()),
                        _ => None,
                    })
                    .unwrap_or_else(|| dar_core::ids::step_id(job_id, &dar_core::ids::plan_decision_id(&task_graph.canonical_bytes()), 0, node.kind.type_tag()));
                *version = self
                    .event_log
                    .append(job_id, *version, Event::StepCompensated { node_id: node.id.clone(), step_id, command_id, reason: "compensating after downstream failure".to_string() })
                    .await?;
            }
        }
        Ok(())
    }
}

fn tool_name_and_args(kind: &NodeKind) -> (String, serde_json::Value) {
    match kind {
        NodeKind::Tool { tool_name, args } => (tool_name.clone(), args.clone()),
        NodeKind::Llm { prompt } => ("llm".to_string(), serde_json::json!({ "prompt": prompt })),
        NodeKind::Workflow { workflow_name } => ("workflow".to_string(), serde_json::json!({ "workflow": workflow_name })),
        NodeKind::Custom { type_name, config } => (type_name.clone(), config.clone()),
        NodeKind::Wait { .. } | NodeKind::Approval { .. } | NodeKind::Condition { .. } => {
            unreachable!("wait-like nodes never reach tool execution")
        }
    }
}
