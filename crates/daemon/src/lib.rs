// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dar-daemon: the worker pool binary — claim loop, lease renewal, reaper,
//! and the signal bus external callers use to unblock or cancel a job.
//! Everything durable lives in `dar-storage`; this crate only schedules.

pub mod env;
pub mod scheduler;
pub mod signal_bus;
pub mod worker_registry;

pub use scheduler::{Reaper, WorkerPool};
pub use signal_bus::{SignalBus, SignalError};
pub use worker_registry::{WorkerRecord, WorkerRegistry};
