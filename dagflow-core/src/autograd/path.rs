use std::collections::{HashMap, HashSet};

use log::debug;

use crate::graph::Graph;
use crate::node::NodeId;
use crate::node_array::NodeArray;

/// Builds ordered traversal paths over a [`Graph`].
///
/// Every call keeps its own visited state, so concurrent or interleaved path
/// computations over the same graph never see each other's marks.
pub struct PathBuilder<'g> {
    graph: &'g Graph,
}

impl<'g> PathBuilder<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        PathBuilder { graph }
    }

    /// The minimal sequence of nodes whose values depend on `inputs` and which
    /// `outputs` depend on, parents before children.
    ///
    /// Inputs are a boundary: their own ancestors are never visited, and they are
    /// not part of the result. A node reachable through several routes appears once.
    /// Replaying the result in order is a valid fprop order and replaying it in
    /// reverse a valid bprop order.
    pub fn path(&self, inputs: &NodeArray, outputs: &NodeArray) -> NodeArray {
        // None: not visited. Some(on_path): visited.
        let mut marks: HashMap<NodeId, bool> = inputs.iter().map(|&id| (id, true)).collect();
        for &out in outputs {
            self.mark_path(out, &mut marks);
        }
        for &input in inputs {
            marks.insert(input, false);
        }

        let mut path = Vec::new();
        for &out in outputs {
            self.build_path(out, &mut marks, &mut path);
        }
        debug!(
            "path from {} inputs to {} outputs: {} nodes",
            inputs.len(),
            outputs.len(),
            path.len()
        );
        path.into()
    }

    /// Marks `id` and, recursively, its ancestors; returns whether `id` depends on an
    /// input. Every parent is explored, even after one of them answered true, so all
    /// routes are marked.
    fn mark_path(&self, id: NodeId, marks: &mut HashMap<NodeId, bool>) -> bool {
        if let Some(&on_path) = marks.get(&id) {
            return on_path;
        }
        let mut on_path = false;
        for parent in self.graph.parents(id) {
            on_path |= self.mark_path(parent, marks);
        }
        marks.insert(id, on_path);
        on_path
    }

    /// Post-order emission of marked nodes, unmarking each one as it is appended.
    fn build_path(&self, id: NodeId, marks: &mut HashMap<NodeId, bool>, path: &mut Vec<NodeId>) {
        if marks.get(&id) != Some(&true) {
            return;
        }
        for parent in self.graph.parents(id) {
            self.build_path(parent, marks, path);
        }
        marks.insert(id, false);
        path.push(id);
    }

    /// Every node `outputs` depend on, outputs included, parents before children.
    pub fn ancestors(&self, outputs: &NodeArray) -> NodeArray {
        self.ancestors_from(&NodeArray::new(), outputs)
    }

    /// Like [`ancestors`](Self::ancestors), with `inputs` as a boundary: inputs and
    /// whatever only feeds the outputs through them are left out.
    pub fn ancestors_from(&self, inputs: &NodeArray, outputs: &NodeArray) -> NodeArray {
        // Pre-marked inputs stop the walk and are never emitted.
        let mut visited: HashSet<NodeId> = inputs.iter().copied().collect();
        let mut order = Vec::new();
        for &out in outputs {
            self.collect_ancestors(out, &mut visited, &mut order);
        }
        order.into()
    }

    fn collect_ancestors(&self, id: NodeId, visited: &mut HashSet<NodeId>, order: &mut Vec<NodeId>) {
        if !visited.insert(id) {
            return;
        }
        for parent in self.graph.parents(id) {
            self.collect_ancestors(parent, visited, order);
        }
        order.push(id);
    }

    /// The parentless nodes (sources and constants) `outputs` depend on.
    pub fn sources(&self, outputs: &NodeArray) -> NodeArray {
        self.sources_from(&NodeArray::new(), outputs)
    }

    /// The parentless nodes that reach `outputs` without going through `inputs`.
    /// Inputs themselves are excluded.
    pub fn sources_from(&self, inputs: &NodeArray, outputs: &NodeArray) -> NodeArray {
        self.ancestors_from(inputs, outputs)
            .into_iter()
            .filter(|&id| self.graph[id].is_leaf())
            .collect()
    }

    /// Parents of `path` members that are neither on `path` nor among `inputs`,
    /// each listed once.
    pub fn non_input_parents(&self, path: &NodeArray, inputs: &NodeArray) -> NodeArray {
        let on_path: HashSet<NodeId> = path.iter().copied().collect();
        let mut seen = HashSet::new();
        let mut out = NodeArray::new();
        for &id in path {
            for parent in self.graph.parents(id) {
                if !on_path.contains(&parent) && !inputs.contains(parent) && seen.insert(parent) {
                    out.push(parent);
                }
            }
        }
        out
    }

    /// The path refreshing everything `path` reads but does not recompute.
    ///
    /// Covers the non-leaf ancestors of the non-input parents of `path`, plus those
    /// of any output missing from `path` (an output that does not depend on the
    /// inputs at all). Values of these nodes only depend on parameters and
    /// constants, so replaying this before `path` brings them up to date after a
    /// parameter update.
    pub fn parents_path(&self, inputs: &NodeArray, path: &NodeArray, outputs: &NodeArray) -> NodeArray {
        let mut frontier = self.non_input_parents(path, inputs);
        for &out in outputs {
            if !path.contains(out) && !inputs.contains(out) && !frontier.contains(out) {
                frontier.push(out);
            }
        }
        let on_path: HashSet<NodeId> = path.iter().copied().collect();
        let refresh: NodeArray = self
            .ancestors(&frontier)
            .into_iter()
            .filter(|&id| !self.graph[id].is_leaf() && !on_path.contains(&id) && !inputs.contains(id))
            .collect();
        debug!("parents path: {} nodes", refresh.len());
        refresh
    }
}

#[cfg(test)]
#[path = "path_test.rs"]
mod tests;
