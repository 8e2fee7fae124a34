// SPDX-License-Identifier: MIT

//! In-memory [`ToolAdapter`] for engine/daemon tests — registers canned
//! responses per tool name, with an optional failure injection hook.

use crate::tool::{AdapterError, AdapterOutput, ToolAdapter};
use async_trait::async_trait;
use dar_core::StepContext;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

enum Canned {
    Ok(AdapterOutput),
    Err(AdapterError),
}

#[derive(Default)]
pub struct FakeAdapter {
    responses: Mutex<HashMap<String, Vec<Canned>>>,
    call_count: AtomicUsize,
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a success response for `tool_name`; repeated calls drain the
    /// queue in FIFO order, and the last entry is reused once exhausted.
    pub fn respond_with(&self, tool_name: impl Into<String>, result: serde_json::Value) {
        self.responses.lock().entry(tool_name.into()).or_default().push(Canned::Ok(AdapterOutput::value(result)));
    }

    pub fn fail_with(&self, tool_name: impl Into<String>, error: AdapterError) {
        self.responses.lock().entry(tool_name.into()).or_default().push(Canned::Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolAdapter for FakeAdapter {
    async fn invoke(&self, tool_name: &str, _args: &serde_json::Value, _ctx: &StepContext) -> Result<AdapterOutput, AdapterError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock();
        let queue = responses.get_mut(tool_name).ok_or_else(|| AdapterError::UnknownTool(tool_name.to_string()))?;
        let next = if queue.len() > 1 { queue.remove(0) } else { clone_last(queue) };
        match next {
            Canned::Ok(output) => Ok(output),
            Canned::Err(err) => Err(err),
        }
    }
}

fn clone_last(queue: &[Canned]) -> Canned {
    match queue.last() {
        Some(Canned::Ok(output)) => Canned::Ok(output.clone()),
        Some(Canned::Err(err)) => Canned::Err(err.clone()),
        None => Canned::Err(AdapterError::UnknownTool("<empty queue>".to_string())),
    }
}

pub type SharedFakeAdapter = Arc<FakeAdapter>;
