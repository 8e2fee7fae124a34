// SPDX-License-Identifier: MIT

//! Resource Verifier hook: confirmation replay calls this for every
//! `state_changed` record of a step before trusting a recorded result.

use dar_core::event::Event;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok,
    Missing { reason: String },
}

/// Checked once per prior `state_changed` record during confirmation replay.
pub trait ResourceVerifier: Send + Sync {
    fn verify(&self, job_id: &str, step_id: &str, change: &Event) -> VerifyOutcome;
}

/// Default verifier: skip verification entirely (every recorded change is
/// trusted). Production deployments inject a verifier that actually checks
/// the referenced external resource still exists.
#[derive(Default)]
pub struct NoopVerifier;

impl ResourceVerifier for NoopVerifier {
    fn verify(&self, _job_id: &str, _step_id: &str, _change: &Event) -> VerifyOutcome {
        VerifyOutcome::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_verifier_always_ok() {
        let change = Event::StateChanged {
            resource_type: "file".into(),
            resource_id: "r1".into(),
            operation: "create".into(),
            step_id: dar_core::StepId::from_string("stp-1"),
            tool_name: "write_file".into(),
            version: None,
            etag: None,
            external_ref: None,
        };
        assert_eq!(NoopVerifier.verify("job-1", "stp-1", &change), VerifyOutcome::Ok);
    }
}
