// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dar-core: shared domain types for the durable agent execution runtime —
//! ids, the event enum, the task graph, job/effect/invocation/checkpoint
//! records, the derived execution state, and the typed sentinel errors that
//! flow between the storage, engine, and daemon crates.

pub mod macros;

pub mod checkpoint;
pub mod clock;
pub mod determinism;
pub mod effect;
pub mod errors;
pub mod event;
pub mod execution_state;
pub mod hash;
pub mod ids;
pub mod invocation;
pub mod job;
pub mod retry;
pub mod task_graph;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use checkpoint::Checkpoint;
pub use clock::{Clock, FakeClock, SystemClock};
pub use determinism::StepContext;
pub use effect::{EffectKind, EffectRecord};
pub use errors::{RuntimeError, StepFailureClass};
pub use event::{Event, InvocationOutcome, ResultType, WaitKind};
pub use execution_state::{ExecutionState, Phase, PendingWait};
pub use ids::{CheckpointId, CommandId, EventId, InvocationId, JobId, StepId, TenantId, WorkerId};
pub use invocation::{InvocationRecord, InvocationStatus};
pub use job::{Job, JobStatus, Lease};
pub use retry::RetryPolicy;
pub use task_graph::{Node, NodeKind, TaskGraph, TaskGraphError};
