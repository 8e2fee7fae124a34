// SPDX-License-Identifier: MIT

//! Wakeup Index: a cross-process "job became runnable" hint channel.
//!
//! Notify is non-blocking and drop-if-full — it is a hint, not a guarantee.
//! Workers must always re-verify via `claim_next_pending_for_worker`; a
//! dropped or duplicate notification is harmless either way.

use dar_core::JobId;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct WakeupIndex {
    tx: mpsc::Sender<JobId>,
    rx: tokio::sync::Mutex<mpsc::Receiver<JobId>>,
}

impl WakeupIndex {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx: tokio::sync::Mutex::new(rx) }
    }

    /// Hint that `job_id` may be runnable. Non-blocking; silently drops the
    /// hint if the channel is full (the worker will still find the job on
    /// its next poll-timeout sweep).
    pub fn notify_ready(&self, job_id: JobId) {
        let _ = self.tx.try_send(job_id);
    }

    /// Block up to `timeout` for a wakeup hint.
    pub async fn receive(&self, timeout: Duration) -> Option<JobId> {
        // Only one receiver task should poll at a time per worker; the lock
        // is held only across the await, never contended across workers
        // since each worker owns its own WakeupIndex instance.
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }
}

impl Default for WakeupIndex {
    fn default() -> Self {
        Self::new(1024)
    }
}
