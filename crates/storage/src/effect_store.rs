// SPDX-License-Identifier: MIT

//! Effect Store: the first durable record of a completed side effect,
//! written before events are appended (phase 1 of the step executor's
//! two-phase commit).

use async_trait::async_trait;
use dar_core::effect::EffectRecord;
use dar_core::{CommandId, JobId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

#[async_trait]
pub trait EffectStore: Send + Sync {
    /// Idempotent upsert keyed by `(job_id, idempotency_key)`.
    async fn put_effect(&self, record: EffectRecord);

    async fn get_by_job_and_idempotency_key(&self, job_id: &JobId, key: &str) -> Option<EffectRecord>;

    async fn get_by_job_and_command_id(&self, job_id: &JobId, command_id: &CommandId) -> Option<EffectRecord>;
}

#[derive(Default)]
pub struct InMemoryEffectStore {
    by_key: Mutex<HashMap<(JobId, String), EffectRecord>>,
}

impl InMemoryEffectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EffectStore for InMemoryEffectStore {
    async fn put_effect(&self, record: EffectRecord) {
        let key = (record.job_id.clone(), record.idempotency_key.clone());
        self.by_key.lock().insert(key, record);
    }

    async fn get_by_job_and_idempotency_key(&self, job_id: &JobId, key: &str) -> Option<EffectRecord> {
        self.by_key.lock().get(&(job_id.clone(), key.to_string())).cloned()
    }

    async fn get_by_job_and_command_id(&self, job_id: &JobId, command_id: &CommandId) -> Option<EffectRecord> {
        self.by_key.lock().values().find(|r| &r.job_id == job_id && &r.command_id == command_id).cloned()
    }
}

pub type SharedEffectStore = Arc<dyn EffectStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use dar_core::effect::EffectKind;

    fn sample(job_id: &JobId, key: &str) -> EffectRecord {
        EffectRecord {
            job_id: job_id.clone(),
            command_id: CommandId::new(),
            idempotency_key: key.to_string(),
            kind: EffectKind::Tool,
            input: serde_json::json!({}),
            output: Some(serde_json::json!("ok")),
            error: None,
            metadata: HashMap::new(),
            created_at_epoch_ms: 0,
        }
    }

    #[tokio::test]
    async fn put_then_get_by_idempotency_key() {
        let store = InMemoryEffectStore::new();
        let job_id = JobId::from_string("job-1");
        store.put_effect(sample(&job_id, "key-1")).await;
        let found = store.get_by_job_and_idempotency_key(&job_id, "key-1").await;
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn put_is_an_idempotent_upsert() {
        let store = InMemoryEffectStore::new();
        let job_id = JobId::from_string("job-1");
        store.put_effect(sample(&job_id, "key-1")).await;
        store.put_effect(sample(&job_id, "key-1")).await;
        assert!(store.get_by_job_and_idempotency_key(&job_id, "key-1").await.is_some());
    }
}
