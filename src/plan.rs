//! Priority-aware topological planning.
//!
//! The planner turns a validated graph into a total execution order that
//! obeys dependencies and prefers higher-priority tasks among ready peers,
//! plus a level assignment (longest dependency-path length from any root)
//! the driver uses for its level barriers.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::error::SequenceError;
use crate::graph::TaskGraph;

/// Renderer-facing projection of a plan, keyed by task id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Total execution order.
    pub order: Vec<String>,
    /// Longest dependency-path length from any root, per task.
    pub level: HashMap<String, usize>,
    pub max_level: usize,
}

/// Internal plan over descriptor slots.
pub(crate) struct Plan {
    /// Descriptor indices in execution order.
    pub order: Vec<usize>,
    /// Level per descriptor index.
    pub level: Vec<usize>,
    pub max_level: usize,
}

impl Plan {
    pub fn project(&self, graph: &TaskGraph) -> ExecutionPlan {
        ExecutionPlan {
            order: self
                .order
                .iter()
                .map(|&slot| graph.descriptors[slot].id.clone())
                .collect(),
            level: self
                .order
                .iter()
                .map(|&slot| (graph.descriptors[slot].id.clone(), self.level[slot]))
                .collect(),
            max_level: self.max_level,
        }
    }
}

/// Ready-pool key: highest priority first, insertion order as tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyKey {
    priority: i64,
    slot: usize,
}

impl Ord for ReadyKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.slot.cmp(&self.slot))
    }
}

impl PartialOrd for ReadyKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Kahn's algorithm with a priority-ordered ready pool.
///
/// Priorities are advisory: they reorder ready peers only and never cross a
/// dependency edge.
pub(crate) fn plan(graph: &TaskGraph) -> Result<Plan, SequenceError> {
    let node_count = graph.len();
    let mut in_degree = vec![0usize; node_count];
    for index in graph.graph.node_indices() {
        let slot = graph.graph[index];
        in_degree[slot] = graph
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .count();
    }

    let mut ready = BinaryHeap::new();
    for (slot, descriptor) in graph.descriptors.iter().enumerate() {
        if in_degree[slot] == 0 {
            ready.push(ReadyKey {
                priority: descriptor.priority,
                slot,
            });
        }
    }

    let mut order = Vec::with_capacity(node_count);
    while let Some(key) = ready.pop() {
        order.push(key.slot);
        let index = graph.indices[&graph.descriptors[key.slot].id];
        for child in graph.graph.neighbors_directed(index, Direction::Outgoing) {
            let child_slot = graph.graph[child];
            in_degree[child_slot] -= 1;
            if in_degree[child_slot] == 0 {
                ready.push(ReadyKey {
                    priority: graph.descriptors[child_slot].priority,
                    slot: child_slot,
                });
            }
        }
    }

    // The builder already rejected cycles; this guards against a stale graph.
    if order.len() != node_count {
        return Err(SequenceError::CycleDetected);
    }

    let mut level = vec![0usize; node_count];
    let mut max_level = 0;
    for &slot in &order {
        let descriptor = &graph.descriptors[slot];
        if !descriptor.parents.is_empty() {
            level[slot] = descriptor
                .parents
                .iter()
                .map(|parent_id| {
                    let parent_index = graph.indices[parent_id];
                    level[graph.graph[parent_index]] + 1
                })
                .max()
                .unwrap_or(0);
        }
        max_level = max_level.max(level[slot]);
    }

    Ok(Plan {
        order,
        level,
        max_level,
    })
}
