// SPDX-License-Identifier: MIT

//! Checkpoint Store: exclusively-owned snapshots taken after each
//! successful non-wait step. Only the latest checkpoint per job is
//! consulted; older ones are kept as history, never deleted.

use async_trait::async_trait;
use dar_core::checkpoint::Checkpoint;
use dar_core::{CheckpointId, JobId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: Checkpoint);
    async fn load(&self, id: &CheckpointId) -> Option<Checkpoint>;
    async fn latest_for_job(&self, job_id: &JobId) -> Option<Checkpoint>;
    async fn list_by_agent(&self, agent_id: &str) -> Vec<Checkpoint>;
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    by_id: Mutex<HashMap<CheckpointId, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) {
        self.by_id.lock().insert(checkpoint.id.clone(), checkpoint);
    }

    async fn load(&self, id: &CheckpointId) -> Option<Checkpoint> {
        self.by_id.lock().get(id).cloned()
    }

    async fn latest_for_job(&self, job_id: &JobId) -> Option<Checkpoint> {
        self.by_id
            .lock()
            .values()
            .filter(|c| &c.job_id == job_id)
            .max_by_key(|c| c.created_at_epoch_ms)
            .cloned()
    }

    async fn list_by_agent(&self, agent_id: &str) -> Vec<Checkpoint> {
        self.by_id.lock().values().filter(|c| c.agent_id == agent_id).cloned().collect()
    }
}

pub type SharedCheckpointStore = Arc<dyn CheckpointStore>;
