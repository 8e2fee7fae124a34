// SPDX-License-Identifier: MIT

//! Test builders and proptest strategies shared across crates' test suites.
//!
//! Gated behind `test-support` so downstream crates can depend on this
//! without pulling proptest into production builds.

use crate::task_graph::{Node, NodeKind, TaskGraph};

/// Build a linear chain of `n` tool nodes, `step_0 -> step_1 -> ... -> step_{n-1}`.
pub fn linear_tool_chain(n: usize, tool_name: &str) -> TaskGraph {
    let mut nodes = Vec::with_capacity(n);
    for i in 0..n {
        nodes.push(Node {
            id: format!("step_{i}"),
            kind: NodeKind::Tool { tool_name: tool_name.to_string(), args: serde_json::json!({ "i": i }) },
            depends_on: if i == 0 { vec![] } else { vec![format!("step_{}", i - 1)] },
            required_capability: None,
        });
    }
    TaskGraph::new(nodes)
}

#[cfg(feature = "proptest")]
pub mod strategies {
    use crate::task_graph::{Node, NodeKind, TaskGraph};
    use proptest::prelude::*;

    /// Arbitrary acyclic task graphs: node `i` may only depend on nodes `< i`.
    pub fn arb_task_graph(max_nodes: usize) -> impl Strategy<Value = TaskGraph> {
        (1..=max_nodes).prop_flat_map(|n| {
            let deps_per_node: Vec<_> = (0..n)
                .map(|i| proptest::collection::vec(0..i.max(1), 0..i.min(3)))
                .collect();
            deps_per_node.prop_map(move |deps_lists| {
                let nodes = (0..n)
                    .map(|i| {
                        let mut deps: Vec<usize> =
                            deps_lists[i].iter().copied().filter(|&d| d < i).collect();
                        deps.sort_unstable();
                        deps.dedup();
                        Node {
                            id: format!("n{i}"),
                            kind: NodeKind::Tool {
                                tool_name: "noop".to_string(),
                                args: serde_json::json!({}),
                            },
                            depends_on: deps.into_iter().map(|d| format!("n{d}")).collect(),
                            required_capability: None,
                        }
                    })
                    .collect();
                TaskGraph::new(nodes)
            })
        })
    }
}
