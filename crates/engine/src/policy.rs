// SPDX-License-Identifier: MIT

//! Capability Policy hook: gates whether a step may execute, and
//! whether it first needs an out-of-band approval.

use dar_core::job::Job;
use std::collections::HashSet;

/// Outcome of a capability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub require_approval: bool,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self { allowed: true, require_approval: false }
    }

    pub fn require_approval() -> Self {
        Self { allowed: true, require_approval: true }
    }

    pub fn deny() -> Self {
        Self { allowed: false, require_approval: false }
    }
}

/// Checked once per step, after the ledger returns `AllowExecute`.
pub trait CapabilityPolicy: Send + Sync {
    fn check(
        &self,
        job: &Job,
        tool_name: &str,
        capability: Option<&str>,
        idempotency_key: &str,
        approved_keys: &HashSet<String>,
    ) -> PolicyDecision;
}

/// Default policy: allow everything, never require approval. Production
/// deployments inject a real implementation (RBAC, rate limits, …).
#[derive(Default)]
pub struct AllowAllPolicy;

impl CapabilityPolicy for AllowAllPolicy {
    fn check(&self, _job: &Job, _tool_name: &str, _capability: Option<&str>, _idempotency_key: &str, _approved_keys: &HashSet<String>) -> PolicyDecision {
        PolicyDecision::allow()
    }
}
