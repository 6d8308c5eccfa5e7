use log::trace;

use super::Graph;
use crate::error::DagError;
use crate::node::NodeId;
use crate::ops::Op;

impl Graph {
    /// Builds, as new graph nodes, the symbolic gradient contributions of `id` to its
    /// parents and accumulates them into the parents' symbolic-gradient slots.
    ///
    /// The slot of `id` must already hold its complete gradient, i.e. every consumer
    /// of `id` has run `symbolic_bprop` first. A node whose slot is empty receives no
    /// gradient and is skipped.
    ///
    /// # Errors
    /// Returns `DagError::Unsupported` for operators without a symbolic rule
    /// (`row_select`).
    pub fn symbolic_bprop(&mut self, id: NodeId) -> Result<(), DagError> {
        let node = self.try_node(id)?;
        if node.is_leaf() {
            return Ok(());
        }
        let gy = match node.g {
            Some(g) => g,
            None => return Ok(()),
        };
        let op = node.op.clone();
        trace!("symbolic_bprop {} ({})", id, op.name());

        match op {
            Op::Source | Op::Constant => {}
            Op::Add(a, b) => {
                self.accumulate_symbolic(a, gy)?;
                self.accumulate_symbolic(b, gy)?;
            }
            Op::Sub(a, b) => {
                self.accumulate_symbolic(a, gy)?;
                let db = self.neg(gy)?;
                self.accumulate_symbolic(b, db)?;
            }
            Op::Mul(a, b) => {
                let da = self.mul(gy, b)?;
                let db = self.mul(gy, a)?;
                self.accumulate_symbolic(a, da)?;
                self.accumulate_symbolic(b, db)?;
            }
            Op::Div(a, b) => {
                let da = self.div(gy, b)?;
                let gy_y = self.mul(gy, id)?;
                let ratio = self.div(gy_y, b)?;
                let db = self.neg(ratio)?;
                self.accumulate_symbolic(a, da)?;
                self.accumulate_symbolic(b, db)?;
            }
            Op::Neg(a) => {
                let da = self.neg(gy)?;
                self.accumulate_symbolic(a, da)?;
            }
            Op::Scale(a, c) => {
                let da = self.scale(gy, c)?;
                self.accumulate_symbolic(a, da)?;
            }
            Op::Square(a) => {
                let two_a = self.scale(a, 2.0)?;
                let da = self.mul(two_a, gy)?;
                self.accumulate_symbolic(a, da)?;
            }
            Op::Exp(a) => {
                let da = self.mul(gy, id)?;
                self.accumulate_symbolic(a, da)?;
            }
            Op::Log(a) => {
                let da = self.div(gy, a)?;
                self.accumulate_symbolic(a, da)?;
            }
            Op::Tanh(a) => {
                // (1 - y²) gy
                let y2 = self.square(id)?;
                let gy_y2 = self.mul(gy, y2)?;
                let da = self.sub(gy, gy_y2)?;
                self.accumulate_symbolic(a, da)?;
            }
            Op::Sum(a) => {
                let (rows, cols) = self.shape(a);
                let da = self.broadcast(gy, rows, cols)?;
                self.accumulate_symbolic(a, da)?;
            }
            Op::Broadcast(a) => {
                let da = self.sum(gy)?;
                self.accumulate_symbolic(a, da)?;
            }
            Op::MatMul(a, b) => {
                let bt = self.transpose(b)?;
                let da = self.matmul(gy, bt)?;
                let at = self.transpose(a)?;
                let db = self.matmul(at, gy)?;
                self.accumulate_symbolic(a, da)?;
                self.accumulate_symbolic(b, db)?;
            }
            Op::Transpose(a) => {
                let da = self.transpose(gy)?;
                self.accumulate_symbolic(a, da)?;
            }
            Op::RowSelect { .. } => {
                return Err(DagError::Unsupported {
                    kind: "row_select",
                    operation: "symbolic_bprop",
                })
            }
        }
        Ok(())
    }

    /// `parent.g = contribution` if the slot is empty, `parent.g + contribution` otherwise.
    fn accumulate_symbolic(&mut self, parent: NodeId, contribution: NodeId) -> Result<(), DagError> {
        let next = match self.nodes[parent.0].g {
            None => contribution,
            Some(prev) => self.add(prev, contribution)?,
        };
        self.nodes[parent.0].g = Some(next);
        Ok(())
    }
}
