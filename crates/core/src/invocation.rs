// SPDX-License-Identifier: MIT

//! Invocation ledger record types — the at-most-once permit authority for
//! tool invocations keyed by idempotency key.

use crate::ids::{InvocationId, JobId, StepId};
use serde::{Deserialize, Serialize};

/// Status of an invocation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Started,
    Success,
    Failure,
    Timeout,
    Confirmed,
}

/// One row per `(job_id, idempotency_key)` pair.
///
/// Invariants: at most one record per key; once `committed` the result is
/// immutable and authoritative; `committed = false` means an in-flight claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub invocation_id: InvocationId,
    pub job_id: JobId,
    pub step_id: StepId,
    pub tool_name: String,
    pub arguments_hash: String,
    pub idempotency_key: String,
    pub status: InvocationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub committed: bool,
    pub started_at_epoch_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_epoch_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl InvocationRecord {
    /// Whether this record represents a durably committed, reusable result.
    pub fn has_reusable_result(&self) -> bool {
        self.committed
            && matches!(self.status, InvocationStatus::Success | InvocationStatus::Confirmed)
            && self.result.is_some()
    }
}
