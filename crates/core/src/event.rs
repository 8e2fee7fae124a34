// SPDX-License-Identifier: MIT

//! Event types appended to the per-job event log.
//!
//! Serializes with `{"type": "event_name", ...fields}`. This is the
//! authoritative, immutable record of everything that has happened to a job;
//! `ExecutionState` (see [`crate::execution_state`]) is derived entirely from
//! folding a job's event stream.

use crate::ids::{CommandId, InvocationId, JobId, StepId};
use crate::task_graph::TaskGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of a tool/LLM/http invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationOutcome {
    Success,
    Failure,
    Timeout,
}

/// How a step finished (or why it didn't).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Success,
    Pure,
    SideEffectCommitted,
    RetryableFailure,
    PermanentFailure,
    CompensatableFailure,
}

impl ResultType {
    /// Whether this result type counts as a completed (non-failed) node.
    pub fn is_completion(self) -> bool {
        matches!(self, ResultType::Success | ResultType::Pure | ResultType::SideEffectCommitted)
    }
}

crate::simple_display! {
    ResultType {
        Success => "success",
        Pure => "pure",
        SideEffectCommitted => "side_effect_committed",
        RetryableFailure => "retryable_failure",
        PermanentFailure => "permanent_failure",
        CompensatableFailure => "compensatable_failure",
    }
}

/// Kind of wait a `wait`/`approval`/`condition` node is blocked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    Wait,
    Approval,
    Condition,
}

/// Events that trigger state transitions in the system.
///
/// Serializes as `{"type": "job_created", ...}`. Unknown type tags
/// deserialize to `Custom` so the log stays forward-compatible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "job_created")]
    JobCreated {
        id: JobId,
        agent_id: String,
        tenant_id: String,
        goal: String,
        #[serde(default)]
        required_capabilities: Vec<String>,
    },

    #[serde(rename = "plan_generated")]
    PlanGenerated { task_graph: TaskGraph, goal: String },

    #[serde(rename = "job_queued")]
    JobQueued { id: JobId },

    #[serde(rename = "job_leased")]
    JobLeased { id: JobId, worker_id: String, lease_expiry_epoch_ms: u64, attempt: u32 },

    #[serde(rename = "job_requeued")]
    JobRequeued { id: JobId, reason: String },

    #[serde(rename = "node_started")]
    NodeStarted { node_id: String, attempt: u32, worker_id: String },

    #[serde(rename = "node_finished")]
    NodeFinished {
        node_id: String,
        step_id: StepId,
        #[serde(default)]
        payload_results: serde_json::Value,
        duration_ms: u64,
        attempt: u32,
        result_type: ResultType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        input_hash: String,
    },

    #[serde(rename = "tool_invocation_started")]
    ToolInvocationStarted {
        invocation_id: InvocationId,
        tool_name: String,
        arguments_hash: String,
        idempotency_key: String,
        started_at_epoch_ms: u64,
    },

    #[serde(rename = "tool_invocation_finished")]
    ToolInvocationFinished {
        invocation_id: InvocationId,
        idempotency_key: String,
        outcome: InvocationOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        finished_at_epoch_ms: u64,
    },

    #[serde(rename = "command_emitted")]
    CommandEmitted { node_id: String, command_id: CommandId, kind: String, input: serde_json::Value },

    #[serde(rename = "command_committed")]
    CommandCommitted { node_id: String, command_id: CommandId, result: serde_json::Value, input_hash: String },

    #[serde(rename = "state_changed")]
    StateChanged {
        resource_type: String,
        resource_id: String,
        operation: String,
        step_id: StepId,
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        etag: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        external_ref: Option<String>,
    },

    #[serde(rename = "state_checkpointed")]
    StateCheckpointed {
        node_id: String,
        state_before: serde_json::Value,
        state_after: serde_json::Value,
        #[serde(default)]
        changed_keys: Vec<String>,
    },

    #[serde(rename = "job_waiting")]
    JobWaiting {
        node_id: String,
        wait_kind: WaitKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at_epoch_ms: Option<u64>,
        correlation_key: String,
        #[serde(default)]
        resumption_context: HashMap<String, String>,
    },

    #[serde(rename = "wait_completed")]
    WaitCompleted { correlation_key: String, payload: serde_json::Value },

    #[serde(rename = "job_completed")]
    JobCompleted { id: JobId },

    #[serde(rename = "job_failed")]
    JobFailed { id: JobId, reason: String },

    #[serde(rename = "job_cancelled")]
    JobCancelled { id: JobId },

    #[serde(rename = "step_compensated")]
    StepCompensated { node_id: String, step_id: StepId, command_id: CommandId, reason: String },

    /// Catch-all for unknown event types (forward compatibility).
    #[serde(other, skip_serializing)]
    Custom,
}

impl Event {
    /// The serialized `type` tag for this event, used for hashing and logging.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Event::JobCreated { .. } => "job_created",
            Event::PlanGenerated { .. } => "plan_generated",
            Event::JobQueued { .. } => "job_queued",
            Event::JobLeased { .. } => "job_leased",
            Event::JobRequeued { .. } => "job_requeued",
            Event::NodeStarted { .. } => "node_started",
            Event::NodeFinished { .. } => "node_finished",
            Event::ToolInvocationStarted { .. } => "tool_invocation_started",
            Event::ToolInvocationFinished { .. } => "tool_invocation_finished",
            Event::CommandEmitted { .. } => "command_emitted",
            Event::CommandCommitted { .. } => "command_committed",
            Event::StateChanged { .. } => "state_changed",
            Event::StateCheckpointed { .. } => "state_checkpointed",
            Event::JobWaiting { .. } => "job_waiting",
            Event::WaitCompleted { .. } => "wait_completed",
            Event::JobCompleted { .. } => "job_completed",
            Event::JobFailed { .. } => "job_failed",
            Event::JobCancelled { .. } => "job_cancelled",
            Event::StepCompensated { .. } => "step_compensated",
            Event::Custom => "custom",
        }
    }

    /// Compact one-line summary for structured log fields.
    pub fn log_summary(&self) -> String {
        format!("{}", self.type_tag())
    }
}
