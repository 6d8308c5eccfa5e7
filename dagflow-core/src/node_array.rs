//! # NodeArray
//!
//! An ordered collection of node handles with batched operations: replaying a
//! propagation over the members, flattening their values, gradients and
//! sensitivities to and from one contiguous vector, aliasing their storage into an
//! external [`SharedBuffer`], and applying updates.
//!
//! A `NodeArray` does not own its nodes. Members may repeat and may be shared with
//! other arrays; no operation re-sorts them.

use std::collections::HashSet;

use log::debug;

use crate::buffer::SharedBuffer;
use crate::error::DagError;
use crate::graph::Graph;
use crate::node::{NodeId, WeightPenalty};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeArray {
    nodes: Vec<NodeId>,
}

impl NodeArray {
    pub fn new() -> Self {
        NodeArray { nodes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeId> {
        self.nodes.iter()
    }

    pub fn as_slice(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.nodes.get(index).copied()
    }

    pub fn push(&mut self, id: NodeId) {
        self.nodes.push(id);
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }

    /// Appends every member of `other`, duplicates included.
    pub fn extend_from(&mut self, other: &NodeArray) {
        self.nodes.extend_from_slice(&other.nodes);
    }

    /// The members in order, keeping only the first occurrence of each.
    pub fn distinct(&self) -> NodeArray {
        NodeArray::new().union(self)
    }

    /// Members of `self` followed by the members of `other` not already present.
    pub fn union(&self, other: &NodeArray) -> NodeArray {
        let mut out = self.clone();
        for &id in other.iter() {
            if !out.contains(id) {
                out.push(id);
            }
        }
        out
    }

    /// The same members in reverse order.
    pub fn reversed(&self) -> NodeArray {
        self.nodes.iter().rev().copied().collect()
    }

    // --- Shapes ---

    /// Total number of elements over every member.
    pub fn n_elems(&self, graph: &Graph) -> usize {
        self.nodes.iter().map(|&id| graph[id].len()).sum()
    }

    pub fn shapes(&self, graph: &Graph) -> Vec<(usize, usize)> {
        self.nodes.iter().map(|&id| graph.shape(id)).collect()
    }

    fn check_len(&self, graph: &Graph, actual: usize, operation: &str) -> Result<(), DagError> {
        let expected = self.n_elems(graph);
        if expected != actual {
            return Err(DagError::LengthMismatch {
                expected,
                actual,
                operation: format!("NodeArray::{operation}"),
            });
        }
        Ok(())
    }

    /// Walks the members with the offset of each one in the flat layout.
    fn layout<'a>(&'a self, graph: &'a Graph) -> impl Iterator<Item = (NodeId, usize, usize)> + 'a {
        self.nodes.iter().scan(0, move |offset, &id| {
            let len = graph[id].len();
            let start = *offset;
            *offset += len;
            Some((id, start, len))
        })
    }

    // --- Propagation replay ---

    /// Calls `fprop` on every member, in stored order.
    pub fn fprop(&self, graph: &mut Graph) -> Result<(), DagError> {
        for &id in &self.nodes {
            graph.fprop(id)?;
        }
        Ok(())
    }

    /// Calls `bprop` on every member, in stored order. Callers holding a forward
    /// path use [`bprop_reverse`](Self::bprop_reverse).
    pub fn bprop(&self, graph: &mut Graph) -> Result<(), DagError> {
        for &id in &self.nodes {
            graph.bprop(id)?;
        }
        Ok(())
    }

    pub fn bprop_reverse(&self, graph: &mut Graph) -> Result<(), DagError> {
        for &id in self.nodes.iter().rev() {
            graph.bprop(id)?;
        }
        Ok(())
    }

    pub fn bbprop(&self, graph: &mut Graph) -> Result<(), DagError> {
        for &id in &self.nodes {
            graph.bbprop(id)?;
        }
        Ok(())
    }

    pub fn bbprop_reverse(&self, graph: &mut Graph) -> Result<(), DagError> {
        for &id in self.nodes.iter().rev() {
            graph.bbprop(id)?;
        }
        Ok(())
    }

    pub fn rfprop(&self, graph: &mut Graph) -> Result<(), DagError> {
        for &id in &self.nodes {
            graph.rfprop(id)?;
        }
        Ok(())
    }

    /// Calls `symbolic_bprop` on every member, last member first.
    pub fn symbolic_bprop_reverse(&self, graph: &mut Graph) -> Result<(), DagError> {
        for &id in self.nodes.iter().rev() {
            graph.symbolic_bprop(id)?;
        }
        Ok(())
    }

    // --- Flat values ---

    /// Writes the concatenated member values into `out`.
    ///
    /// # Errors
    /// Returns `DagError::LengthMismatch` unless `out.len() == n_elems()`.
    pub fn copy_to(&self, graph: &Graph, out: &mut [f64]) -> Result<(), DagError> {
        self.check_len(graph, out.len(), "copy_to")?;
        for (id, start, len) in self.layout(graph) {
            out[start..start + len].copy_from_slice(&graph[id].value());
        }
        Ok(())
    }

    pub fn to_vec(&self, graph: &Graph) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.n_elems(graph));
        for &id in &self.nodes {
            out.extend_from_slice(&graph[id].value());
        }
        out
    }

    /// Overwrites the member values from the concatenation `data`.
    pub fn copy_from(&self, graph: &mut Graph, data: &[f64]) -> Result<(), DagError> {
        self.check_len(graph, data.len(), "copy_from")?;
        let slots: Vec<_> = self.layout(graph).collect();
        for (id, start, len) in slots {
            graph[id].set_value(&data[start..start + len])?;
        }
        Ok(())
    }

    // --- Flat gradients ---

    pub fn copy_gradient_to(&self, graph: &Graph, out: &mut [f64]) -> Result<(), DagError> {
        self.check_len(graph, out.len(), "copy_gradient_to")?;
        for (id, start, len) in self.layout(graph) {
            out[start..start + len].copy_from_slice(&graph[id].gradient());
        }
        Ok(())
    }

    pub fn gradient_to_vec(&self, graph: &Graph) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.n_elems(graph));
        for &id in &self.nodes {
            out.extend_from_slice(&graph[id].gradient());
        }
        out
    }

    pub fn copy_gradient_from(&self, graph: &mut Graph, data: &[f64]) -> Result<(), DagError> {
        self.check_len(graph, data.len(), "copy_gradient_from")?;
        let slots: Vec<_> = self.layout(graph).collect();
        for (id, start, len) in slots {
            graph[id].set_gradient(&data[start..start + len])?;
        }
        Ok(())
    }

    /// Adds the concatenated member gradients into `out`.
    pub fn accumulate_gradient_to(&self, graph: &Graph, out: &mut [f64]) -> Result<(), DagError> {
        self.check_len(graph, out.len(), "accumulate_gradient_to")?;
        for (id, start, len) in self.layout(graph) {
            for (o, g) in out[start..start + len].iter_mut().zip(graph[id].gradient().iter()) {
                *o += *g;
            }
        }
        Ok(())
    }

    /// Adds `data` into the member gradients (this is how outputs are seeded).
    pub fn accumulate_gradient_from(&self, graph: &mut Graph, data: &[f64]) -> Result<(), DagError> {
        self.check_len(graph, data.len(), "accumulate_gradient_from")?;
        let slots: Vec<_> = self.layout(graph).collect();
        for (id, start, len) in slots {
            graph[id].accumulate_gradient(&data[start..start + len])?;
        }
        Ok(())
    }

    /// Zeroes every member gradient, honoring partial-update tracking.
    pub fn clear_gradient(&self, graph: &mut Graph) {
        for &id in &self.nodes {
            graph[id].clear_gradient();
        }
    }

    /// Sets every element of every member gradient to `value`, marking all rows dirty.
    pub fn fill_gradient(&self, graph: &mut Graph, value: f64) {
        for &id in &self.nodes {
            let node = &mut graph[id];
            node.gradient_view().fill(value);
            node.mark_all_dirty();
        }
    }

    // --- Forward sensitivities and diagonal Hessians ---

    pub fn copy_r_value_from(&self, graph: &mut Graph, data: &[f64]) -> Result<(), DagError> {
        self.check_len(graph, data.len(), "copy_r_value_from")?;
        let slots: Vec<_> = self.layout(graph).collect();
        for (id, start, len) in slots {
            graph[id].set_r_value(&data[start..start + len])?;
        }
        Ok(())
    }

    /// Writes the member sensitivities into `out`; members without one read as zero.
    pub fn copy_r_value_to(&self, graph: &Graph, out: &mut [f64]) -> Result<(), DagError> {
        self.check_len(graph, out.len(), "copy_r_value_to")?;
        for (id, start, len) in self.layout(graph) {
            let dst = &mut out[start..start + len];
            match graph[id].r_value() {
                Some(r) => dst.copy_from_slice(r),
                None => dst.fill(0.0),
            }
        }
        Ok(())
    }

    pub fn clear_r_value(&self, graph: &mut Graph) {
        for &id in &self.nodes {
            graph[id].clear_r_value();
        }
    }

    pub fn copy_diag_hessian_to(&self, graph: &Graph, out: &mut [f64]) -> Result<(), DagError> {
        self.check_len(graph, out.len(), "copy_diag_hessian_to")?;
        for (id, start, len) in self.layout(graph) {
            let dst = &mut out[start..start + len];
            match graph[id].diag_hessian() {
                Some(h) => dst.copy_from_slice(h),
                None => dst.fill(0.0),
            }
        }
        Ok(())
    }

    pub fn clear_diag_hessian(&self, graph: &mut Graph) {
        for &id in &self.nodes {
            graph[id].clear_diag_hessian();
        }
    }

    // --- Aliasing ---

    /// Re-points every member value into consecutive, disjoint slices of `buffer`,
    /// starting at its beginning. Current values are copied into the buffer first.
    ///
    /// After the call, writes through the buffer and through the nodes are
    /// mutually visible. The buffer may be longer than needed.
    ///
    /// # Errors
    /// Changes nothing and returns
    /// * `DagError::DuplicateNode` if a member repeats, since one node cannot back two slots;
    /// * `DagError::BufferTooSmall` if the members do not fit.
    pub fn make_shared_value(&self, graph: &mut Graph, buffer: &SharedBuffer) -> Result<(), DagError> {
        self.make_shared_value_at(graph, buffer, 0)
    }

    pub fn make_shared_value_at(
        &self,
        graph: &mut Graph,
        buffer: &SharedBuffer,
        offset: usize,
    ) -> Result<(), DagError> {
        self.check_distinct("make_shared_value")?;
        self.check_fits(graph, buffer, offset)?;
        let slots: Vec<_> = self.layout(graph).collect();
        for (id, start, len) in slots {
            let view = buffer.view(offset + start, len)?;
            let node = &mut graph[id];
            view.copy_from_slice(&node.value_vec())?;
            node.rebind_value(view);
        }
        debug!("shared {} values into a buffer of {}", self.len(), buffer.len());
        Ok(())
    }

    /// Same as [`make_shared_value`](Self::make_shared_value), for gradients.
    pub fn make_shared_gradient(&self, graph: &mut Graph, buffer: &SharedBuffer) -> Result<(), DagError> {
        self.make_shared_gradient_at(graph, buffer, 0)
    }

    pub fn make_shared_gradient_at(
        &self,
        graph: &mut Graph,
        buffer: &SharedBuffer,
        offset: usize,
    ) -> Result<(), DagError> {
        self.check_distinct("make_shared_gradient")?;
        self.check_fits(graph, buffer, offset)?;
        let slots: Vec<_> = self.layout(graph).collect();
        for (id, start, len) in slots {
            let view = buffer.view(offset + start, len)?;
            let node = &mut graph[id];
            view.copy_from_slice(&node.gradient_vec())?;
            node.rebind_gradient(view);
        }
        debug!("shared {} gradients into a buffer of {}", self.len(), buffer.len());
        Ok(())
    }

    fn check_distinct(&self, operation: &str) -> Result<(), DagError> {
        let mut seen = HashSet::new();
        match self.nodes.iter().find(|&&id| !seen.insert(id)) {
            Some(&node) => Err(DagError::DuplicateNode {
                node,
                operation: format!("NodeArray::{operation}"),
            }),
            None => Ok(()),
        }
    }

    fn check_fits(&self, graph: &Graph, buffer: &SharedBuffer, offset: usize) -> Result<(), DagError> {
        let required = self.n_elems(graph);
        if offset + required > buffer.len() {
            return Err(DagError::BufferTooSmall {
                required,
                offset,
                actual: buffer.len(),
            });
        }
        Ok(())
    }

    // --- Updates ---

    /// `value += step_size * (coeff * direction + bias)` for every member, where
    /// `direction` is laid out like [`copy_to`](Self::copy_to).
    ///
    /// Returns true if any member hit its box constraint.
    pub fn update(
        &self,
        graph: &mut Graph,
        step_size: f64,
        direction: &[f64],
        coeff: f64,
        bias: f64,
    ) -> Result<bool, DagError> {
        self.check_len(graph, direction.len(), "update")?;
        let slots: Vec<_> = self.layout(graph).collect();
        let mut hit = false;
        for (id, start, len) in slots {
            hit |= graph[id].update_along(step_size, &direction[start..start + len], coeff, bias)?;
        }
        Ok(hit)
    }

    /// `Node::update(step_size)` on every member.
    pub fn update_all(&self, graph: &mut Graph, step_size: f64) -> bool {
        let mut hit = false;
        for &id in &self.nodes {
            hit |= graph[id].update(step_size);
        }
        hit
    }

    pub fn update_and_clear(&self, graph: &mut Graph, step_size: f64) -> bool {
        let mut hit = false;
        for &id in &self.nodes {
            hit |= graph[id].update_and_clear(step_size);
        }
        hit
    }

    pub fn update_with_weight_decay(
        &self,
        graph: &mut Graph,
        step_size: f64,
        weight_decay: f64,
        penalty: WeightPenalty,
        clear_gradient: bool,
    ) -> bool {
        let mut hit = false;
        for &id in &self.nodes {
            hit |= graph[id].update_with_weight_decay(step_size, weight_decay, penalty, clear_gradient);
        }
        hit
    }

    /// The symbolic-gradient slot of every member.
    pub fn symbolic_gradient(&self, graph: &Graph) -> Vec<Option<NodeId>> {
        self.nodes.iter().map(|&id| graph[id].symbolic_gradient()).collect()
    }
}

impl From<Vec<NodeId>> for NodeArray {
    fn from(nodes: Vec<NodeId>) -> Self {
        NodeArray { nodes }
    }
}

impl From<&[NodeId]> for NodeArray {
    fn from(nodes: &[NodeId]) -> Self {
        NodeArray { nodes: nodes.to_vec() }
    }
}

impl<const N: usize> From<[NodeId; N]> for NodeArray {
    fn from(nodes: [NodeId; N]) -> Self {
        NodeArray { nodes: nodes.to_vec() }
    }
}

impl FromIterator<NodeId> for NodeArray {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        NodeArray {
            nodes: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for NodeArray {
    type Item = NodeId;
    type IntoIter = std::vec::IntoIter<NodeId>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

impl<'a> IntoIterator for &'a NodeArray {
    type Item = &'a NodeId;
    type IntoIter = std::slice::Iter<'a, NodeId>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

#[cfg(test)]
#[path = "node_array_test.rs"]
mod tests;
