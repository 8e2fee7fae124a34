// SPDX-License-Identifier: MIT

//! Typed sentinel errors carried alongside regular `Result` returns.
//!
//! The executor switches on these kinds rather than unwinding; no panic or
//! exception ever carries control-flow information.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a step failure, driving retry/compensation behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepFailureClass {
    Retryable,
    Permanent,
    Compensatable,
}

/// Errors surfaced by the event log, ledger, and step executor.
///
/// This is the single error type threaded through `dar-engine`; store-level
/// crates (`dar-storage`) define their own narrower error enums and the
/// engine maps them into these sentinel kinds at the boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    /// Event-log CAS append failed — caller must re-derive state and retry.
    #[error("version mismatch: expected {expected}, found {actual}")]
    VersionMismatch { expected: u64, actual: u64 },

    /// This worker is no longer the lease holder; abort the step silently.
    #[error("lease lost for job {job_id}")]
    LeaseLost { job_id: String },

    /// Another worker's claim on this idempotency key is still in flight.
    #[error("another worker is executing idempotency key {idempotency_key}")]
    WaitOtherWorker { idempotency_key: String },

    /// Cooperative suspension: not a failure. The worker releases its lease.
    #[error("job {job_id} is waiting on node {node_id}")]
    JobWaiting { job_id: String, node_id: String, correlation_key: String },

    /// A `require_approval` capability check is unmet for this correlation key.
    #[error("capability requires approval for correlation key {correlation_key}")]
    CapabilityRequiresApproval { correlation_key: String },

    /// A classified step outcome.
    #[error("step failed ({class:?}): {reason}")]
    StepFailure { class: StepFailureClass, reason: String },

    /// Step code used a forbidden non-deterministic primitive (raw clock/RNG/IO).
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// A prior invocation was started but never finished, and no result is
    /// recoverable — the activity-log barrier. Always permanent.
    #[error("orphaned invocation for idempotency key {idempotency_key}: manual intervention required")]
    OrphanedInvocation { idempotency_key: String },

    /// Confirmation replay found a referenced external resource missing.
    #[error("resource verification failed for step {step_id}: {reason}")]
    ResourceVerificationFailed { step_id: String, reason: String },

    /// The task graph is malformed (cyclic, duplicate ids, unreachable deps).
    #[error("invalid task graph: {0}")]
    InvalidTaskGraph(String),

    /// A job has no `plan_generated` event and cannot be executed.
    #[error("job {0} is unplanned")]
    Unplanned(String),
}

impl RuntimeError {
    /// Whether this error represents cooperative suspension rather than failure.
    pub fn is_suspension(&self) -> bool {
        matches!(
            self,
            RuntimeError::JobWaiting { .. } | RuntimeError::CapabilityRequiresApproval { .. }
        )
    }

    /// Whether the caller should retry after re-deriving state (no job-level failure).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RuntimeError::VersionMismatch { .. } | RuntimeError::WaitOtherWorker { .. }
        )
    }
}
