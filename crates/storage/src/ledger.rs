// SPDX-License-Identifier: MIT

//! Invocation Ledger: the at-most-once permit authority for tool
//! invocations. Pure decision engine over the Invocation Record table —
//! `acquire` never runs an adapter itself, it only decides whether the
//! caller may.

use async_trait::async_trait;
use dar_core::invocation::{InvocationRecord, InvocationStatus};
use dar_core::{InvocationId, JobId, StepId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// What the caller should do after consulting the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireDecision {
    /// No prior claim (or the prior claim's lease was cleared) — run the adapter.
    AllowExecute { invocation_id: InvocationId },
    /// A committed result already exists — inject it, don't re-run.
    ReturnRecordedResult { result: serde_json::Value },
    /// Another worker's claim is in flight — back off and reconsult.
    WaitOtherWorker,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("no invocation record found for {job_id}/{idempotency_key}")]
    NotFound { job_id: String, idempotency_key: String },
    #[error("lease fencing failure committing invocation {invocation_id}")]
    LeaseLost { invocation_id: String },
}

impl From<LedgerError> for dar_core::RuntimeError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound { job_id, .. } => dar_core::RuntimeError::Unplanned(job_id),
            LedgerError::LeaseLost { invocation_id } => dar_core::RuntimeError::LeaseLost { job_id: invocation_id },
        }
    }
}

#[async_trait]
pub trait InvocationLedger: Send + Sync {
    /// Decide whether to execute, reuse a result, or wait.
    ///
    /// `replay_result`, when `Some`, comes from the event stream (a
    /// `tool_invocation_finished(success)` already seen during replay) and
    /// always short-circuits to `ReturnRecordedResult` without touching the
    /// ledger table.
    async fn acquire(
        &self,
        job_id: &JobId,
        step_id: &StepId,
        tool_name: &str,
        args_hash: &str,
        idempotency_key: &str,
        replay_result: Option<serde_json::Value>,
    ) -> AcquireDecision;

    /// Commit a successful result. Caller must already have passed lease
    /// fencing (`JobStore::validate_attempt`) before calling this.
    async fn commit(&self, job_id: &JobId, idempotency_key: &str, result: serde_json::Value) -> Result<(), LedgerError>;

    /// Record a failed/timed-out attempt without committing (the record stays
    /// available for a future `acquire` to retry against).
    async fn record_failure(&self, job_id: &JobId, idempotency_key: &str, status: InvocationStatus) -> Result<(), LedgerError>;

    /// Look up a previously committed result, if any.
    async fn recover(&self, job_id: &JobId, idempotency_key: &str) -> Option<serde_json::Value>;

    /// Operator escape hatch: clear a stuck (non-committed) claim so a future
    /// `acquire` can proceed. No automatic clearing happens in the core.
    async fn clear_claim(&self, job_id: &JobId, idempotency_key: &str);
}

pub struct InMemoryLedger {
    records: Mutex<HashMap<(JobId, String), InvocationRecord>>,
    epoch_ms: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl InMemoryLedger {
    pub fn new(epoch_ms: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self { records: Mutex::new(HashMap::new()), epoch_ms: Box::new(epoch_ms) }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(|| 0)
    }
}

#[async_trait]
impl InvocationLedger for InMemoryLedger {
    async fn acquire(
        &self,
        job_id: &JobId,
        step_id: &StepId,
        tool_name: &str,
        args_hash: &str,
        idempotency_key: &str,
        replay_result: Option<serde_json::Value>,
    ) -> AcquireDecision {
        if let Some(result) = replay_result {
            return AcquireDecision::ReturnRecordedResult { result };
        }

        let mut records = self.records.lock();
        let key = (job_id.clone(), idempotency_key.to_string());
        match records.get(&key) {
            Some(existing) if existing.has_reusable_result() => {
                AcquireDecision::ReturnRecordedResult { result: existing.result.clone().unwrap_or(serde_json::Value::Null) }
            }
            Some(existing) if !existing.committed => AcquireDecision::WaitOtherWorker,
            // committed=true but without a reusable result (a committed failure) — allow retry.
            _ => {
                let invocation_id = InvocationId::new();
                records.insert(
                    key,
                    InvocationRecord {
                        invocation_id: invocation_id.clone(),
                        job_id: job_id.clone(),
                        step_id: step_id.clone(),
                        tool_name: tool_name.to_string(),
                        arguments_hash: args_hash.to_string(),
                        idempotency_key: idempotency_key.to_string(),
                        status: InvocationStatus::Started,
                        result: None,
                        committed: false,
                        started_at_epoch_ms: (self.epoch_ms)(),
                        finished_at_epoch_ms: None,
                        external_id: None,
                    },
                );
                AcquireDecision::AllowExecute { invocation_id }
            }
        }
    }

    async fn commit(&self, job_id: &JobId, idempotency_key: &str, result: serde_json::Value) -> Result<(), LedgerError> {
        let mut records = self.records.lock();
        let key = (job_id.clone(), idempotency_key.to_string());
        let record = records
            .get_mut(&key)
            .ok_or_else(|| LedgerError::NotFound { job_id: job_id.to_string(), idempotency_key: idempotency_key.to_string() })?;
        record.status = InvocationStatus::Success;
        record.committed = true;
        record.result = Some(result);
        record.finished_at_epoch_ms = Some((self.epoch_ms)());
        Ok(())
    }

    async fn record_failure(&self, job_id: &JobId, idempotency_key: &str, status: InvocationStatus) -> Result<(), LedgerError> {
        let mut records = self.records.lock();
        let key = (job_id.clone(), idempotency_key.to_string());
        let record = records
            .get_mut(&key)
            .ok_or_else(|| LedgerError::NotFound { job_id: job_id.to_string(), idempotency_key: idempotency_key.to_string() })?;
        record.status = status;
        record.committed = true;
        record.finished_at_epoch_ms = Some((self.epoch_ms)());
        Ok(())
    }

    async fn recover(&self, job_id: &JobId, idempotency_key: &str) -> Option<serde_json::Value> {
        let records = self.records.lock();
        records.get(&(job_id.clone(), idempotency_key.to_string())).filter(|r| r.has_reusable_result()).and_then(|r| r.result.clone())
    }

    async fn clear_claim(&self, job_id: &JobId, idempotency_key: &str) {
        self.records.lock().remove(&(job_id.clone(), idempotency_key.to_string()));
    }
}

pub type SharedLedger = Arc<dyn InvocationLedger>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_acquire_allows_execute_then_subsequent_wait() {
        let ledger = InMemoryLedger::default();
        let job_id = JobId::from_string("job-1");
        let step_id = StepId::from_string("stp-1");

        let first = ledger.acquire(&job_id, &step_id, "tool", "hash", "key-1", None).await;
        assert!(matches!(first, AcquireDecision::AllowExecute { .. }));

        let second = ledger.acquire(&job_id, &step_id, "tool", "hash", "key-1", None).await;
        assert_eq!(second, AcquireDecision::WaitOtherWorker);
    }

    #[tokio::test]
    async fn after_commit_further_acquires_reuse_result() {
        let ledger = InMemoryLedger::default();
        let job_id = JobId::from_string("job-1");
        let step_id = StepId::from_string("stp-1");
        ledger.acquire(&job_id, &step_id, "tool", "hash", "key-1", None).await;
        ledger.commit(&job_id, "key-1", serde_json::json!("ok")).await.unwrap();

        let decision = ledger.acquire(&job_id, &step_id, "tool", "hash", "key-1", None).await;
        assert_eq!(decision, AcquireDecision::ReturnRecordedResult { result: serde_json::json!("ok") });
    }

    #[tokio::test]
    async fn replay_result_short_circuits_without_touching_table() {
        let ledger = InMemoryLedger::default();
        let job_id = JobId::from_string("job-1");
        let step_id = StepId::from_string("stp-1");
        let decision =
            ledger.acquire(&job_id, &step_id, "tool", "hash", "key-1", Some(serde_json::json!("from-replay"))).await;
        assert_eq!(decision, AcquireDecision::ReturnRecordedResult { result: serde_json::json!("from-replay") });
        assert!(ledger.recover(&job_id, "key-1").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_acquires_only_one_allow_execute_per_key() {
        let ledger = Arc::new(InMemoryLedger::default());
        let job_id = JobId::from_string("job-race");
        let step_id = StepId::from_string("stp-1");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            let job_id = job_id.clone();
            let step_id = step_id.clone();
            handles.push(tokio::spawn(async move { ledger.acquire(&job_id, &step_id, "tool", "hash", "key-shared", None).await }));
        }
        let mut allow_count = 0;
        for h in handles {
            if matches!(h.await.unwrap(), AcquireDecision::AllowExecute { .. }) {
                allow_count += 1;
            }
        }
        assert_eq!(allow_count, 1);
    }
}
