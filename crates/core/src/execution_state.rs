// SPDX-License-Identifier: MIT

//! `ExecutionState`: the single derived input to every step-executor decision.
//!
//! Produced by folding a job's event stream (see the replay engine in
//! `dar-engine`); never persisted directly. Two independent folds of the same
//! event stream must produce an equal `ExecutionState` — this is the replay
//! purity contract tested throughout the engine crate.

use crate::event::WaitKind;
use crate::task_graph::TaskGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Coarse phase derived from the event stream, used for quick job-level checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No `plan_generated` event yet seen — the job is unrunnable.
    Unplanned,
    Running,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

/// A wait the job is currently blocked on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWait {
    pub node_id: String,
    pub wait_kind: WaitKind,
    pub correlation_key: String,
}

/// State derived from folding a job's event stream left-to-right.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub task_graph: Option<TaskGraph>,
    pub cursor_node: Option<String>,
    pub completed_node_ids: HashSet<String>,
    pub payload_results: HashMap<String, serde_json::Value>,
    pub completed_command_ids: HashSet<String>,
    pub command_results: HashMap<String, serde_json::Value>,
    /// idempotency_key -> recorded result, for keys with a finished success event.
    pub completed_tool_invocations: HashMap<String, serde_json::Value>,
    /// idempotency_keys with a `started` event but no matching `finished`.
    pub pending_tool_invocations: HashSet<String>,
    pub state_changes_by_step: HashMap<String, Vec<crate::event::Event>>,
    pub phase: Phase,
    pub pending_wait: Option<PendingWait>,
    /// correlation_key -> payload, set once a `wait_completed` event is seen.
    pub resolved_signals: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Unplanned
    }
}

impl ExecutionState {
    pub fn is_node_completed(&self, node_id: &str) -> bool {
        self.completed_node_ids.contains(node_id)
    }

    /// Activity-log barrier: a key started but never finished, with no
    /// recoverable result, means a prior claim never committed.
    pub fn is_orphaned_invocation(&self, idempotency_key: &str) -> bool {
        self.pending_tool_invocations.contains(idempotency_key)
            && !self.completed_tool_invocations.contains_key(idempotency_key)
    }
}
