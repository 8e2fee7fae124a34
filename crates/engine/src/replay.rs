// SPDX-License-Identifier: MIT

//! Replay Engine: folds a job's event stream left-to-right into an
//! [`ExecutionState`]. Pure — two independent folds of the same stream must
//! produce equal state, which is what makes crash recovery and multi-worker
//! takeover safe.

use dar_core::event::{Event, ResultType};
use dar_core::execution_state::{ExecutionState, Phase, PendingWait};
use dar_storage::StoredEvent;

/// Fold `events` into the execution state they describe.
pub fn replay(events: &[StoredEvent]) -> ExecutionState {
    let mut state = ExecutionState::default();
    for stored in events {
        apply(&mut state, &stored.event);
    }
    state
}

fn apply(state: &mut ExecutionState, event: &Event) {
    match event {
        Event::JobCreated { .. } => {}

        Event::PlanGenerated { task_graph, .. } => {
            state.task_graph = Some(task_graph.clone());
            if matches!(state.phase, Phase::Unplanned) {
                state.phase = Phase::Running;
            }
        }

        Event::JobQueued { .. } | Event::JobLeased { .. } | Event::JobRequeued { .. } => {}

        Event::NodeStarted { node_id, .. } => {
            state.cursor_node = Some(node_id.clone());
        }

        Event::NodeFinished { node_id, payload_results, result_type, .. } => {
            if result_type.is_completion() {
                state.completed_node_ids.insert(node_id.clone());
                state.payload_results.insert(node_id.clone(), payload_results.clone());
            }
        }

        Event::ToolInvocationStarted { idempotency_key, .. } => {
            state.pending_tool_invocations.insert(idempotency_key.clone());
        }

        Event::ToolInvocationFinished { idempotency_key, outcome, result, .. } => {
            state.pending_tool_invocations.remove(idempotency_key);
            if matches!(outcome, dar_core::event::InvocationOutcome::Success) {
                state.completed_tool_invocations.insert(idempotency_key.clone(), result.clone().unwrap_or(serde_json::Value::Null));
            }
        }

        Event::CommandEmitted { .. } => {}

        Event::CommandCommitted { command_id, result, .. } => {
            state.completed_command_ids.insert(command_id.to_string());
            state.command_results.insert(command_id.to_string(), result.clone());
        }

        Event::StateChanged { step_id, .. } => {
            state.state_changes_by_step.entry(step_id.to_string()).or_default().push(event.clone());
        }

        Event::StateCheckpointed { .. } => {}

        Event::JobWaiting { node_id, wait_kind, correlation_key, .. } => {
            state.phase = Phase::Waiting;
            state.pending_wait =
                Some(PendingWait { node_id: node_id.clone(), wait_kind: wait_kind.clone(), correlation_key: correlation_key.clone() });
        }

        Event::WaitCompleted { correlation_key, payload } => {
            state.resolved_signals.insert(correlation_key.clone(), payload.clone());
            if state.pending_wait.as_ref().is_some_and(|w| &w.correlation_key == correlation_key) {
                state.pending_wait = None;
                state.phase = Phase::Running;
            }
        }

        Event::JobCompleted { .. } => {
            state.phase = Phase::Completed;
        }

        Event::JobFailed { reason, .. } => {
            state.phase = Phase::Failed;
            state.failure_reason = Some(reason.clone());
        }

        Event::JobCancelled { .. } => {
            state.phase = Phase::Cancelled;
        }

        Event::StepCompensated { step_id, .. } => {
            state.state_changes_by_step.entry(step_id.to_string()).or_default().push(event.clone());
        }

        Event::Custom => {}
    }
}

/// Rebuild a step's previously recorded `state_changed` records, oldest first
/// — used by confirmation replay to re-verify externally
/// referenced resources before injecting a recorded result.
pub fn state_changes_for_step<'a>(state: &'a ExecutionState, step_id: &str) -> &'a [Event] {
    state.state_changes_by_step.get(step_id).map(|v| v.as_slice()).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use dar_core::{InvocationId, InvocationOutcome, JobId, Node, NodeKind, StepId, TaskGraph};

    fn stored(job_id: &JobId, version: u64, event: Event) -> StoredEvent {
        StoredEvent {
            id: format!("evt-{version}"),
            job_id: job_id.clone(),
            version,
            event,
            created_at_rfc3339: format!("2026-01-01T00:00:{version:02}Z"),
            prev_hash: String::new(),
            hash: String::new(),
        }
    }

    fn graph() -> TaskGraph {
        TaskGraph::new(vec![Node {
            id: "n1".into(),
            kind: NodeKind::Tool { tool_name: "echo".into(), args: serde_json::json!({}) },
            depends_on: vec![],
            required_capability: None,
        }])
    }

    #[test]
    fn replay_is_pure_across_two_independent_folds() {
        let job_id = JobId::from_string("job-1");
        let events = vec![
            stored(&job_id, 1, Event::JobCreated { id: job_id.clone(), agent_id: "a".into(), tenant_id: "t".into(), goal: "g".into(), required_capabilities: vec![] }),
            stored(&job_id, 2, Event::PlanGenerated { task_graph: graph(), goal: "g".into() }),
            stored(
                &job_id,
                3,
                Event::NodeFinished {
                    node_id: "n1".into(),
                    step_id: StepId::from_string("stp-1"),
                    payload_results: serde_json::json!({"ok": true}),
                    duration_ms: 5,
                    attempt: 1,
                    result_type: ResultType::Success,
                    reason: None,
                    input_hash: "h".into(),
                },
            ),
        ];

        let a = replay(&events);
        let b = replay(&events);
        assert_eq!(a, b);
        assert!(a.is_node_completed("n1"));
        assert_eq!(a.phase, Phase::Running);
    }

    #[test]
    fn started_without_finished_is_pending_not_completed() {
        let job_id = JobId::from_string("job-1");
        let events = vec![stored(
            &job_id,
            1,
            Event::ToolInvocationStarted {
                invocation_id: InvocationId::new(),
                tool_name: "echo".into(),
                arguments_hash: "h".into(),
                idempotency_key: "key-1".into(),
                started_at_epoch_ms: 0,
            },
        )];
        let state = replay(&events);
        assert!(state.is_orphaned_invocation("key-1"));
    }

    #[test]
    fn finished_success_clears_pending_and_marks_completed() {
        let job_id = JobId::from_string("job-1");
        let events = vec![
            stored(
                &job_id,
                1,
                Event::ToolInvocationStarted {
                    invocation_id: InvocationId::new(),
                    tool_name: "echo".into(),
                    arguments_hash: "h".into(),
                    idempotency_key: "key-1".into(),
                    started_at_epoch_ms: 0,
                },
            ),
            stored(
                &job_id,
                2,
                Event::ToolInvocationFinished {
                    invocation_id: InvocationId::new(),
                    idempotency_key: "key-1".into(),
                    outcome: InvocationOutcome::Success,
                    result: Some(serde_json::json!("done")),
                    error: None,
                    finished_at_epoch_ms: 1,
                },
            ),
        ];
        let state = replay(&events);
        assert!(!state.is_orphaned_invocation("key-1"));
        assert_eq!(state.completed_tool_invocations.get("key-1"), Some(&serde_json::json!("done")));
    }

    #[test]
    fn wait_then_completed_resumes_running() {
        let job_id = JobId::from_string("job-1");
        let events = vec![
            stored(
                &job_id,
                1,
                Event::JobWaiting {
                    node_id: "n1".into(),
                    wait_kind: dar_core::event::WaitKind::Approval,
                    reason: None,
                    expires_at_epoch_ms: None,
                    correlation_key: "ck-1".into(),
                    resumption_context: Default::default(),
                },
            ),
            stored(&job_id, 2, Event::WaitCompleted { correlation_key: "ck-1".into(), payload: serde_json::json!({"approved": true}) }),
        ];
        let state = replay(&events);
        assert_eq!(state.phase, Phase::Running);
        assert!(state.pending_wait.is_none());
        assert_eq!(state.resolved_signals.get("ck-1"), Some(&serde_json::json!({"approved": true})));
    }
}
