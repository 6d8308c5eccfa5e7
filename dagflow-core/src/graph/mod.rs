//! # Graph arena
//!
//! The [`Graph`] owns every [`Node`]. Nodes refer to their parents through
//! [`NodeId`] handles, so shared sub-expressions are plain shared handles and no
//! reference counting or cycle breaking is involved: every node lives exactly as long
//! as the graph.
//!
//! Operator constructors (`add`, `matmul`, ...) live in `builders`, the per-node
//! numeric propagation rules in `propagation`, symbolic differentiation in `symbolic`
//! and the boundary-limited deep copy in `clone`.

use std::ops::{Index, IndexMut};

use log::trace;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use rand_distr::Normal;

use crate::error::DagError;
use crate::node::{Bounds, Node, NodeId};
use crate::ops::Op;

mod builders;
mod clone;
mod propagation;
mod symbolic;

pub use clone::CopiesMap;

/// Arena of nodes forming a directed acyclic graph.
///
/// Edges only ever point to nodes that already exist when a node is created, so a
/// graph built through this API is acyclic by construction.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Graph { nodes: Vec::new() }
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Handles of every node, in creation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Returns the node behind `id`.
    ///
    /// # Errors
    /// Returns `DagError::InvalidNode` if `id` was not issued by this graph.
    pub fn try_node(&self, id: NodeId) -> Result<&Node, DagError> {
        self.nodes.get(id.0).ok_or(DagError::InvalidNode(id))
    }

    pub fn try_node_mut(&mut self, id: NodeId) -> Result<&mut Node, DagError> {
        self.nodes.get_mut(id.0).ok_or(DagError::InvalidNode(id))
    }

    /// Returns the node behind `id`.
    ///
    /// Panics if `id` was not issued by this graph; use [`try_node`](Self::try_node)
    /// for handles of unknown origin.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn parents(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes[id.0].parents()
    }

    pub fn shape(&self, id: NodeId) -> (usize, usize) {
        self.nodes[id.0].shape()
    }

    /// Labels a node for logs and error messages.
    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) {
        self.nodes[id.0].set_name(name);
    }

    pub fn set_bounds(&mut self, id: NodeId, min: f64, max: f64) -> Result<(), DagError> {
        let bounds = Bounds::new(min, max)?;
        self.try_node_mut(id)?.set_bounds(bounds);
        Ok(())
    }

    pub(crate) fn push(&mut self, op: Op, rows: usize, cols: usize, value: Vec<f64>) -> NodeId {
        let id = NodeId(self.nodes.len());
        trace!("new {} node {} ({}x{})", op.name(), id, rows, cols);
        self.nodes.push(Node::new(op, rows, cols, value));
        id
    }

    fn leaf(&mut self, op: Op, rows: usize, cols: usize, data: Vec<f64>) -> Result<NodeId, DagError> {
        if data.len() != rows * cols {
            return Err(DagError::LengthMismatch {
                expected: rows * cols,
                actual: data.len(),
                operation: format!("create {} node", op.name()),
            });
        }
        Ok(self.push(op, rows, cols, data))
    }

    // --- Leaf constructors ---

    /// Creates a trainable leaf (an input or a parameter) holding `data` in row-major order.
    ///
    /// # Errors
    /// Returns `DagError::LengthMismatch` if `data` does not hold `rows * cols` elements.
    pub fn source(&mut self, rows: usize, cols: usize, data: Vec<f64>) -> Result<NodeId, DagError> {
        self.leaf(Op::Source, rows, cols, data)
    }

    pub fn source_zeros(&mut self, rows: usize, cols: usize) -> NodeId {
        self.push(Op::Source, rows, cols, vec![0.0; rows * cols])
    }

    /// A 1x1 trainable leaf.
    pub fn scalar(&mut self, value: f64) -> NodeId {
        self.push(Op::Source, 1, 1, vec![value])
    }

    /// Creates a non-trainable leaf.
    pub fn constant(&mut self, rows: usize, cols: usize, data: Vec<f64>) -> Result<NodeId, DagError> {
        self.leaf(Op::Constant, rows, cols, data)
    }

    pub fn constant_scalar(&mut self, value: f64) -> NodeId {
        self.push(Op::Constant, 1, 1, vec![value])
    }

    pub fn constant_filled(&mut self, rows: usize, cols: usize, value: f64) -> NodeId {
        self.push(Op::Constant, rows, cols, vec![value; rows * cols])
    }

    /// Trainable leaf drawn from `N(mean, std²)`.
    ///
    /// # Errors
    /// Returns `DagError::ConfigurationError` if `std` is negative or not finite.
    pub fn randn<R: Rng + ?Sized>(
        &mut self,
        rows: usize,
        cols: usize,
        mean: f64,
        std: f64,
        rng: &mut R,
    ) -> Result<NodeId, DagError> {
        let normal = Normal::new(mean, std)
            .map_err(|e| DagError::ConfigurationError(format!("randn({mean}, {std}): {e}")))?;
        let data = (0..rows * cols).map(|_| normal.sample(rng)).collect();
        Ok(self.push(Op::Source, rows, cols, data))
    }

    /// Trainable leaf drawn uniformly from `[low, high)`.
    ///
    /// # Errors
    /// Returns `DagError::ConfigurationError` unless `low < high`.
    pub fn uniform<R: Rng + ?Sized>(
        &mut self,
        rows: usize,
        cols: usize,
        low: f64,
        high: f64,
        rng: &mut R,
    ) -> Result<NodeId, DagError> {
        if !(low < high) {
            return Err(DagError::ConfigurationError(format!(
                "uniform requires low < high, got [{low}, {high})"
            )));
        }
        let dist = Uniform::new(low, high);
        let data = (0..rows * cols).map(|_| dist.sample(rng)).collect();
        Ok(self.push(Op::Source, rows, cols, data))
    }

    /// Clears the forward sensitivity of every node in the arena.
    pub fn clear_r_values(&mut self) {
        for node in &mut self.nodes {
            node.clear_r_value();
        }
    }

    /// Clears the symbolic-gradient slot of every node in the arena.
    pub fn clear_symbolic_gradients(&mut self) {
        for node in &mut self.nodes {
            node.g = None;
        }
    }
}

impl Index<NodeId> for Graph {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        self.node(id)
    }
}

impl IndexMut<NodeId> for Graph {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        self.node_mut(id)
    }
}

#[cfg(test)]
#[path = "graph_test.rs"]
mod tests;
