// SPDX-License-Identifier: MIT

//! Identifier types threaded through the event log, ledger, and stores.

crate::define_id! {
    /// Unique identifier for a durable job.
    pub struct JobId("job-");
}

crate::define_id! {
    /// Unique identifier for a single event-log record.
    pub struct EventId("evt-");
}

crate::define_id! {
    /// Deterministic identifier for one step execution within a job.
    ///
    /// Derived from `(job_id, plan_decision_id, index, node_type)` — see
    /// [`crate::ids::step_id`] — rather than randomly generated, so the same
    /// plan always produces the same step ids across replays.
    pub struct StepId("stp-");
}

crate::define_id! {
    /// Unique identifier for a tool/LLM/http invocation attempt.
    pub struct InvocationId("inv-");
}

crate::define_id! {
    /// Unique identifier for a checkpoint snapshot.
    pub struct CheckpointId("ckp-");
}

crate::define_id! {
    /// Unique identifier for a registered worker process.
    pub struct WorkerId("wkr-");
}

crate::define_id! {
    /// Unique identifier for a committed command (a single recorded side effect).
    pub struct CommandId("cmd-");
}

crate::define_id! {
    /// Unique identifier for a tenant scoping jobs and capabilities.
    pub struct TenantId("ten-");
}

/// Derive the deterministic step id for a node at a given position in the plan.
///
/// `step_id = H(job_id | plan_decision_id | index | node_type)[:16]`
pub fn step_id(job_id: &JobId, plan_decision_id: &str, index: usize, node_type: &str) -> StepId {
    let digest = crate::hash::hash_parts(&[job_id.as_str(), plan_decision_id, &index.to_string(), node_type]);
    StepId::from_string(format!("{}{}", StepId::PREFIX, &digest[..16]))
}

/// Derive the plan decision id for a task graph — a stable fingerprint of its bytes.
pub fn plan_decision_id(task_graph_bytes: &[u8]) -> String {
    crate::hash::hash_bytes(task_graph_bytes)[..16].to_string()
}
