// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dar-storage: the durable runtime's persistence layer — event log, job
//! store, invocation ledger, effect store, checkpoint store, wakeup index,
//! and the evidence export/verify contract.
//!
//! Every trait here is implemented in-memory with [`parking_lot::Mutex`]
//! guarding a single critical section per operation; the comments on each
//! implementation describe the SQL-backed equivalent a production deployment
//! would swap in (CAS-guarded inserts, `SELECT ... FOR UPDATE SKIP LOCKED`).

pub mod checkpoint_store;
pub mod effect_store;
pub mod event_log;
pub mod evidence;
pub mod job_store;
pub mod ledger;
pub mod wakeup;

pub use checkpoint_store::{CheckpointStore, InMemoryCheckpointStore, SharedCheckpointStore};
pub use effect_store::{EffectStore, InMemoryEffectStore, SharedEffectStore};
pub use event_log::{EventLog, EventLogError, InMemoryEventLog, SharedEventLog, StoredEvent};
pub use evidence::{EvidenceError, Manifest, Metadata, Proof, VerifyReport};
pub use job_store::{InMemoryJobStore, JobStore, JobStoreError, SharedJobStore};
pub use ledger::{AcquireDecision, InMemoryLedger, InvocationLedger, LedgerError, SharedLedger};
pub use wakeup::WakeupIndex;
