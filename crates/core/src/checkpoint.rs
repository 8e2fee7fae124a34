// SPDX-License-Identifier: MIT

//! Checkpoints: serialized task-graph + payload-results snapshot taken after
//! each successful non-wait step. Only the latest checkpoint per job matters
//! for resumption; history is kept but never consulted by the executor.

use crate::ids::{CheckpointId, JobId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub agent_id: String,
    pub job_id: JobId,
    pub cursor_node: String,
    pub task_graph_bytes: Vec<u8>,
    pub payload_results_bytes: Vec<u8>,
    pub created_at_epoch_ms: u64,
}
