// SPDX-License-Identifier: MIT

//! Task graph: the DAG of nodes a planner produces, and the deterministic
//! topological order the step executor walks it in.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// The type-specific shape of a node. `Custom` is an escape hatch for
/// planner-defined composite node kinds that don't need bespoke executor
/// handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Tool { tool_name: String, args: serde_json::Value },
    Llm { prompt: String },
    Workflow { workflow_name: String },
    Wait { reason: Option<String> },
    Approval { correlation_key: String, reason: Option<String> },
    Condition { expression: String },
    Custom { type_name: String, config: serde_json::Value },
}

impl NodeKind {
    /// Stable lowercase tag used for step-id derivation and event payloads.
    pub fn type_tag(&self) -> &'static str {
        match self {
            NodeKind::Tool { .. } => "tool",
            NodeKind::Llm { .. } => "llm",
            NodeKind::Workflow { .. } => "workflow",
            NodeKind::Wait { .. } => "wait",
            NodeKind::Approval { .. } => "approval",
            NodeKind::Condition { .. } => "condition",
            NodeKind::Custom { .. } => "custom",
        }
    }

    /// Wait-like nodes never run an adapter; the executor writes `job_waiting`
    /// and suspends immediately.
    pub fn is_wait_like(&self) -> bool {
        matches!(self, NodeKind::Wait { .. } | NodeKind::Approval { .. } | NodeKind::Condition { .. })
    }
}

/// One node in the task graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    /// Node ids that must complete before this node becomes eligible.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Capability required to run this node (checked by the Capability Policy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_capability: Option<String>,
}

/// The DAG of nodes produced by the (opaque, external) planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGraph {
    pub nodes: Vec<Node>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TaskGraphError {
    #[error("task graph contains a cycle or references an unknown node id")]
    Cyclic,
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),
}

impl TaskGraph {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Canonical JSON bytes of this task graph, used to derive `plan_decision_id`.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        crate::hash::canonical_json(&value).into_bytes()
    }

    /// Deterministic topological order via Kahn's algorithm with lexicographic
    /// tie-breaking on node id, so `step_index` is stable across replays.
    pub fn topological_order(&self) -> Result<Vec<&Node>, TaskGraphError> {
        let mut by_id: HashMap<&str, &Node> = HashMap::new();
        for node in &self.nodes {
            if by_id.insert(&node.id, node).is_some() {
                return Err(TaskGraphError::DuplicateNodeId(node.id.clone()));
            }
        }

        let mut indegree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in &self.nodes {
            indegree.entry(&node.id).or_insert(0);
            for dep in &node.depends_on {
                if !by_id.contains_key(dep.as_str()) {
                    return Err(TaskGraphError::Cyclic);
                }
                *indegree.entry(&node.id).or_insert(0) += 1;
                dependents.entry(dep.as_str()).or_default().push(&node.id);
            }
        }

        // BTreeSet gives us lexicographic ordering "for free" as a ready-set.
        let mut ready: BTreeSet<&str> =
            indegree.iter().filter(|(_, &deg)| deg == 0).map(|(&id, _)| id).collect();
        let mut remaining_indegree: BTreeMap<&str, usize> = indegree.into_iter().collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.extend(ready.iter().copied());
        ready.clear();

        while let Some(id) = pop_smallest(&mut queue) {
            order.push(by_id[id]);
            if let Some(deps) = dependents.get(id) {
                for &dependent in deps {
                    let entry = remaining_indegree.get_mut(dependent).expect("tracked node");
                    *entry -= 1;
                    if *entry == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(TaskGraphError::Cyclic);
        }
        Ok(order)
    }
}

/// Pop the lexicographically smallest id currently in the queue, preserving
/// Kahn's-algorithm correctness while making tie-breaks deterministic.
fn pop_smallest<'a>(queue: &mut VecDeque<&'a str>) -> Option<&'a str> {
    if queue.is_empty() {
        return None;
    }
    let (idx, _) = queue.iter().enumerate().min_by_key(|(_, id)| **id)?;
    queue.remove(idx)
}
