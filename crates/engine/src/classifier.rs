// SPDX-License-Identifier: MIT

//! Error Classifier / Retry controller: maps adapter failures to
//! {retryable, permanent, compensatable} and holds the registered
//! compensation callbacks for already-committed prior steps.

use async_trait::async_trait;
use dar_adapters::AdapterError;
use dar_core::errors::StepFailureClass;
use dar_core::{CommandId, JobId};
use std::collections::HashMap;
use std::sync::Arc;

/// Classifies one adapter failure into a step failure class.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, tool_name: &str, error: &AdapterError) -> StepFailureClass;
}

/// Default classification: timeouts are retryable, everything else is
/// permanent. Tools with compensating actions register a
/// [`CompensationHandler`] and rely on a custom classifier to route their
/// failures to `Compensatable` instead.
#[derive(Default)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, _tool_name: &str, error: &AdapterError) -> StepFailureClass {
        match error {
            AdapterError::Timeout { .. } => StepFailureClass::Retryable,
            AdapterError::UnknownTool(_) => StepFailureClass::Permanent,
            AdapterError::Failed { .. } => StepFailureClass::Permanent,
        }
    }
}

/// Idempotent compensation for a previously committed step.
#[async_trait]
pub trait CompensationHandler: Send + Sync {
    async fn compensate(&self, job_id: &JobId, node_id: &str, command_id: &CommandId, result: &serde_json::Value) -> Result<(), String>;
}

/// Registry of compensation callbacks keyed by tool name, consulted in
/// reverse topological order when a step is classified `Compensatable`.
#[derive(Default, Clone)]
pub struct CompensationRegistry {
    handlers: HashMap<String, Arc<dyn CompensationHandler>>,
}

impl CompensationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool_name: impl Into<String>, handler: Arc<dyn CompensationHandler>) {
        self.handlers.insert(tool_name.into(), handler);
    }

    pub fn get(&self, tool_name: &str) -> Option<Arc<dyn CompensationHandler>> {
        self.handlers.get(tool_name).cloned()
    }
}
