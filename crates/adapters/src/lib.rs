// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dar-adapters: the tool/LLM/workflow adapter boundary. The durable runtime
//! treats concrete clients as external collaborators; this crate
//! defines only the seam the Step Executor calls through, plus a fake for
//! tests.

pub mod tool;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use tool::{AdapterError, AdapterOutput, StateChange, ToolAdapter};

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeAdapter, SharedFakeAdapter};
