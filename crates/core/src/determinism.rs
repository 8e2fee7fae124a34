// SPDX-License-Identifier: MIT

//! The determinism contract for step code: time, randomness, and
//! recorded external calls must flow through [`StepContext`] rather than
//! direct `SystemTime::now()`/`rand`/raw IO, so a replayed step reproduces
//! the exact sequence of values a live run produced.
//!
//! `StepContext` owns an ordered log of "calls" (clock reads, RNG draws,
//! recorded external responses). In live mode each call appends its result
//! to the log; the log is persisted in the step's effect record metadata. In
//! replay mode the same calls are served back from that log in order — the
//! step never re-executes the non-deterministic primitive.

use crate::hash::hash_parts;
use crate::ids::{JobId, StepId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

enum Mode {
    Live { log: Mutex<Vec<serde_json::Value>> },
    Replay { log: Vec<serde_json::Value>, cursor: AtomicUsize },
}

/// Per-step handle threaded through adapter invocations.
pub struct StepContext {
    job_id: JobId,
    step_id: StepId,
    mode: Mode,
}

impl StepContext {
    /// A live execution: every call is recorded as it happens.
    pub fn live(job_id: JobId, step_id: StepId) -> Self {
        Self { job_id, step_id, mode: Mode::Live { log: Mutex::new(Vec::new()) } }
    }

    /// A confirmation/catch-up replay: calls are served from a previously
    /// recorded log instead of touching the clock or an RNG.
    pub fn replay(job_id: JobId, step_id: StepId, recorded_calls: Vec<serde_json::Value>) -> Self {
        Self { job_id, step_id, mode: Mode::Replay { log: recorded_calls, cursor: AtomicUsize::new(0) } }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn step_id(&self) -> &StepId {
        &self.step_id
    }

    pub fn is_replay(&self) -> bool {
        matches!(self.mode, Mode::Replay { .. })
    }

    /// `Clock(ctx)`: the current epoch in milliseconds, recorded on first
    /// read and replayed verbatim thereafter.
    pub fn clock_epoch_ms(&self, clock: &impl crate::clock::Clock) -> u64 {
        match &self.mode {
            Mode::Live { log } => {
                let value = clock.epoch_ms();
                log.lock().push(serde_json::json!(value));
                value
            }
            Mode::Replay { log, cursor } => {
                let idx = cursor.fetch_add(1, Ordering::SeqCst);
                log.get(idx).and_then(|v| v.as_u64()).unwrap_or(0)
            }
        }
    }

    /// `RandIntn(ctx, n)`: a value in `[0, n)` seeded by `(job_id, step_id,
    /// call_index)` — deterministic without needing to record anything,
    /// since the seed alone reproduces it on replay.
    pub fn rand_intn(&self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        let call_index = match &self.mode {
            Mode::Live { log } => log.lock().len(),
            Mode::Replay { cursor, .. } => cursor.load(Ordering::SeqCst),
        };
        let digest = hash_parts(&[self.job_id.as_str(), self.step_id.as_str(), "rand", &call_index.to_string()]);
        let seed = u64::from_str_radix(&digest[..16], 16).unwrap_or(0);
        let value = seed % n;
        match &self.mode {
            Mode::Live { log } => log.lock().push(serde_json::json!(value)),
            Mode::Replay { cursor, .. } => {
                cursor.fetch_add(1, Ordering::SeqCst);
            }
        }
        value
    }

    /// `HTTP(ctx, effect_id, do_request)`: run `do_request` on live execution
    /// and record its result; on replay, return the recorded response
    /// without invoking `do_request` at all.
    pub fn http_call(&self, do_request: impl FnOnce() -> serde_json::Value) -> serde_json::Value {
        match &self.mode {
            Mode::Live { log } => {
                let value = do_request();
                log.lock().push(value.clone());
                value
            }
            Mode::Replay { log, cursor } => {
                let idx = cursor.fetch_add(1, Ordering::SeqCst);
                log.get(idx).cloned().unwrap_or(serde_json::Value::Null)
            }
        }
    }

    /// The recorded call log, persisted into the step's effect record so a
    /// future confirmation replay can reconstruct this exact `StepContext`.
    pub fn recorded_calls(&self) -> Vec<serde_json::Value> {
        match &self.mode {
            Mode::Live { log } => log.lock().clone(),
            Mode::Replay { log, .. } => log.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn rand_intn_is_deterministic_for_the_same_job_and_step() {
        let job_id = JobId::from_string("job-1");
        let step_id = StepId::from_string("stp-1");
        let ctx_a = StepContext::live(job_id.clone(), step_id.clone());
        let ctx_b = StepContext::live(job_id, step_id);
        assert_eq!(ctx_a.rand_intn(100), ctx_b.rand_intn(100));
    }

    #[test]
    fn rand_intn_varies_by_call_index() {
        let ctx = StepContext::live(JobId::from_string("job-1"), StepId::from_string("stp-1"));
        let a = ctx.rand_intn(1_000_000);
        let b = ctx.rand_intn(1_000_000);
        assert_ne!(a, b);
    }

    #[test]
    fn replay_reproduces_recorded_clock_reads() {
        let job_id = JobId::from_string("job-1");
        let step_id = StepId::from_string("stp-1");
        let clock = FakeClock::new();

        let live = StepContext::live(job_id.clone(), step_id.clone());
        let first = live.clock_epoch_ms(&clock);
        clock.advance(std::time::Duration::from_secs(5));
        let second = live.clock_epoch_ms(&clock);
        let recorded = live.recorded_calls();

        let replay = StepContext::replay(job_id, step_id, recorded);
        assert_eq!(replay.clock_epoch_ms(&clock), first);
        assert_eq!(replay.clock_epoch_ms(&clock), second);
    }
}
