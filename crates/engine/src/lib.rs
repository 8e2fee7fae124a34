// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dar-engine: the replay engine and step executor plus the
//! policy/verifier/classifier extension points the executor consults on
//! every step. Depends on `dar-storage` for the durable stores and
//! `dar-adapters` for the tool-invocation boundary; owns no persistence
//! itself.

pub mod classifier;
pub mod executor;
pub mod policy;
pub mod replay;
pub mod verifier;

pub use classifier::{CompensationHandler, CompensationRegistry, DefaultClassifier, ErrorClassifier};
pub use executor::{StepExecutor, StepOutcome};
pub use policy::{AllowAllPolicy, CapabilityPolicy, PolicyDecision};
pub use replay::{replay, state_changes_for_step};
pub use verifier::{NoopVerifier, ResourceVerifier, VerifyOutcome};
