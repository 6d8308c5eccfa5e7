//! # Operator kinds (`ops`)
//!
//! Every non-leaf node of a [`Graph`](crate::graph::Graph) carries one [`Op`]. The set of
//! operators is closed: forward evaluation, reverse accumulation, diagonal-Hessian
//! propagation, R-operator propagation and symbolic differentiation are all dispatched
//! with a `match` over this enum (see `graph::propagation` and `graph::symbolic`), so a
//! new operator cannot be added without deciding every rule for it.
//!
//! The dense arithmetic used by those rules lives in the private [`kernels`] module.

use crate::node::NodeId;

pub(crate) mod kernels;

/// The operator computing a node from its parents.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Trainable leaf. Inputs and parameters are sources.
    Source,
    /// Non-trainable leaf. Never picked as a default parameter.
    Constant,
    /// Elementwise `a + b`.
    Add(NodeId, NodeId),
    /// Elementwise `a - b`.
    Sub(NodeId, NodeId),
    /// Elementwise `a * b`.
    Mul(NodeId, NodeId),
    /// Elementwise `a / b`.
    Div(NodeId, NodeId),
    /// Elementwise `-a`.
    Neg(NodeId),
    /// Elementwise `c * a` for a fixed scalar `c`.
    Scale(NodeId, f64),
    /// Elementwise `a * a`.
    Square(NodeId),
    /// Elementwise `exp(a)`.
    Exp(NodeId),
    /// Elementwise natural logarithm.
    Log(NodeId),
    /// Elementwise hyperbolic tangent.
    Tanh(NodeId),
    /// Sum of every element, producing a 1x1 node.
    Sum(NodeId),
    /// Replicates a 1x1 node over the shape of the result.
    Broadcast(NodeId),
    /// Matrix product `a · b`.
    MatMul(NodeId, NodeId),
    /// Matrix transpose.
    Transpose(NodeId),
    /// Gathers the listed rows of `table` (embedding-style lookup).
    ///
    /// Its gradient only touches the selected rows, which makes it the
    /// canonical producer of partial (sparse) updates.
    RowSelect { table: NodeId, rows: Vec<usize> },
}

impl Op {
    /// Short, stable name of the operator kind, used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Source => "source",
            Op::Constant => "constant",
            Op::Add(..) => "add",
            Op::Sub(..) => "sub",
            Op::Mul(..) => "mul",
            Op::Div(..) => "div",
            Op::Neg(_) => "neg",
            Op::Scale(..) => "scale",
            Op::Square(_) => "square",
            Op::Exp(_) => "exp",
            Op::Log(_) => "log",
            Op::Tanh(_) => "tanh",
            Op::Sum(_) => "sum",
            Op::Broadcast(_) => "broadcast",
            Op::MatMul(..) => "matmul",
            Op::Transpose(_) => "transpose",
            Op::RowSelect { .. } => "row_select",
        }
    }

    /// Parents in operand order. A parent used twice appears twice.
    pub fn parents(&self) -> Vec<NodeId> {
        match self {
            Op::Source | Op::Constant => Vec::new(),
            Op::Add(a, b) | Op::Sub(a, b) | Op::Mul(a, b) | Op::Div(a, b) | Op::MatMul(a, b) => {
                vec![*a, *b]
            }
            Op::Neg(a)
            | Op::Scale(a, _)
            | Op::Square(a)
            | Op::Exp(a)
            | Op::Log(a)
            | Op::Tanh(a)
            | Op::Sum(a)
            | Op::Broadcast(a)
            | Op::Transpose(a) => vec![*a],
            Op::RowSelect { table, .. } => vec![*table],
        }
    }

    /// True for parentless operators.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Op::Source | Op::Constant)
    }

    /// Returns the same operator with every parent passed through `map`.
    pub fn remap_parents(&self, map: impl Fn(NodeId) -> NodeId) -> Op {
        match self {
            Op::Source => Op::Source,
            Op::Constant => Op::Constant,
            Op::Add(a, b) => Op::Add(map(*a), map(*b)),
            Op::Sub(a, b) => Op::Sub(map(*a), map(*b)),
            Op::Mul(a, b) => Op::Mul(map(*a), map(*b)),
            Op::Div(a, b) => Op::Div(map(*a), map(*b)),
            Op::Neg(a) => Op::Neg(map(*a)),
            Op::Scale(a, c) => Op::Scale(map(*a), *c),
            Op::Square(a) => Op::Square(map(*a)),
            Op::Exp(a) => Op::Exp(map(*a)),
            Op::Log(a) => Op::Log(map(*a)),
            Op::Tanh(a) => Op::Tanh(map(*a)),
            Op::Sum(a) => Op::Sum(map(*a)),
            Op::Broadcast(a) => Op::Broadcast(map(*a)),
            Op::MatMul(a, b) => Op::MatMul(map(*a), map(*b)),
            Op::Transpose(a) => Op::Transpose(map(*a)),
            Op::RowSelect { table, rows } => Op::RowSelect {
                table: map(*table),
                rows: rows.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parents_and_remap() {
        let (a, b) = (NodeId(0), NodeId(1));
        let op = Op::MatMul(a, b);
        assert_eq!(op.parents(), vec![a, b]);
        assert_eq!(op.name(), "matmul");

        let shifted = op.remap_parents(|p| NodeId(p.index() + 10));
        assert_eq!(shifted, Op::MatMul(NodeId(10), NodeId(11)));

        let select = Op::RowSelect { table: a, rows: vec![2, 0] };
        assert_eq!(select.parents(), vec![a]);
        assert!(!select.is_leaf());
        assert!(Op::Constant.is_leaf());
        assert!(Op::Source.parents().is_empty());
    }
}
