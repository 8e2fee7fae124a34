// SPDX-License-Identifier: MIT

//! Effect records: the first durable write of a successful side effect,
//! written before the corresponding events are appended (phase 1 of the
//! step executor's two-phase commit).

use crate::ids::{CommandId, JobId};
use serde::{Deserialize, Serialize};

/// What kind of external interaction produced this effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Tool,
    Llm,
    Http,
    Time,
    Random,
    Human,
}

crate::simple_display! {
    EffectKind {
        Tool => "tool",
        Llm => "llm",
        Http => "http",
        Time => "time",
        Random => "random",
        Human => "human",
    }
}

/// A durable record of one completed side effect.
///
/// Uniquely keyed by `(job_id, idempotency_key)` or `(job_id, command_id)` —
/// the Effect Store's `put_effect` is an idempotent upsert on either key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRecord {
    pub job_id: JobId,
    pub command_id: CommandId,
    pub idempotency_key: String,
    pub kind: EffectKind,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
    pub created_at_epoch_ms: u64,
}

impl EffectRecord {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
