// SPDX-License-Identifier: MIT

//! The tool adapter boundary ("out of scope: the LLM client and tool
//! implementations"). The executor depends only on this trait; concrete
//! tool/LLM/workflow clients are external collaborators that plug in here.

use async_trait::async_trait;
use dar_core::StepContext;
use serde::{Deserialize, Serialize};

/// A `state_changed` record an adapter reports alongside its result. The
/// executor fills in `step_id`/`tool_name` before appending the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub resource_type: String,
    pub resource_id: String,
    pub operation: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub external_ref: Option<String>,
}

/// What a successful adapter invocation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterOutput {
    pub result: serde_json::Value,
    #[serde(default)]
    pub state_changes: Vec<StateChange>,
}

impl AdapterOutput {
    pub fn value(result: serde_json::Value) -> Self {
        Self { result, state_changes: Vec::new() }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum AdapterError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool {tool_name} failed: {message}")]
    Failed { tool_name: String, message: String },
    #[error("tool {tool_name} timed out after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },
}

/// Runs one tool/LLM/workflow invocation. Implementations must route any
/// wall-clock read, randomness, or external IO through `ctx` so replay stays
/// reproducible (see [`dar_core::StepContext`]).
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    async fn invoke(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
        ctx: &StepContext,
    ) -> Result<AdapterOutput, AdapterError>;
}
