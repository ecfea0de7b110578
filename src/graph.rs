//! Materializes task descriptors into a validated DAG.

use std::collections::HashMap;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::descriptor::TaskDescriptor;
use crate::error::SequenceError;

/// A validated task graph. Node weights are indices into `descriptors`, so
/// parent/child links are non-owning handles into the descriptor table.
#[derive(Debug)]
pub(crate) struct TaskGraph {
    pub descriptors: Vec<TaskDescriptor>,
    pub graph: DiGraph<usize, ()>,
    pub indices: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    /// Builds the graph, rejecting duplicate ids, unknown parents, and
    /// cycles. An empty descriptor list is valid and yields an empty graph.
    pub fn build(descriptors: Vec<TaskDescriptor>) -> Result<Self, SequenceError> {
        let mut graph = DiGraph::with_capacity(descriptors.len(), descriptors.len());
        let mut indices = HashMap::with_capacity(descriptors.len());

        for (slot, descriptor) in descriptors.iter().enumerate() {
            if indices.contains_key(&descriptor.id) {
                return Err(SequenceError::DuplicateTaskId(descriptor.id.clone()));
            }
            let index = graph.add_node(slot);
            indices.insert(descriptor.id.clone(), index);
        }

        for descriptor in &descriptors {
            let child = indices[&descriptor.id];
            for parent_id in &descriptor.parents {
                let parent = indices.get(parent_id).copied().ok_or_else(|| {
                    SequenceError::UnknownDependency {
                        parent: parent_id.clone(),
                        child: descriptor.id.clone(),
                    }
                })?;
                graph.add_edge(parent, child, ());
            }
        }

        if is_cyclic_directed(&graph) {
            return Err(SequenceError::CycleDetected);
        }

        Ok(Self {
            descriptors,
            graph,
            indices,
        })
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }
}
