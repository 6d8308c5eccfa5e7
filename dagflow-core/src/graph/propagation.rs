// Per-node numeric propagation: fprop, bprop, bbprop and rfprop.
//
// Every rule reads its operands into owned vectors (or short-lived borrows) before
// writing anything, because value and gradient storage may be aliased across nodes.

use std::cell::Ref;

use log::trace;

use super::Graph;
use crate::error::DagError;
use crate::node::NodeId;
use crate::ops::kernels::{
    gather_rows, map, matmul_kernel, sum, transpose_kernel, zip3_map, zip_map,
};
use crate::ops::Op;

/// What one node adds into one of its parents.
enum Contribution {
    /// A full-size contribution.
    Dense(Vec<f64>),
    /// Per-row contributions `(row, data)`; rows may repeat.
    Rows(Vec<(usize, Vec<f64>)>),
}

fn row_contributions(rows: &[usize], data: &[f64], cols: usize) -> Contribution {
    Contribution::Rows(
        rows.iter()
            .enumerate()
            .map(|(i, &r)| (r, data[i * cols..(i + 1) * cols].to_vec()))
            .collect(),
    )
}

impl Graph {
    fn val(&self, id: NodeId) -> Ref<'_, [f64]> {
        self.nodes[id.0].value.read()
    }

    fn r_or_zeros(&self, id: NodeId) -> Vec<f64> {
        let node = &self.nodes[id.0];
        node.r_value.clone().unwrap_or_else(|| vec![0.0; node.len()])
    }

    /// Recomputes the value of `id` from its parents' current values.
    ///
    /// Leaves are left untouched. Repeated calls with unchanged parents produce
    /// bit-identical values.
    pub fn fprop(&mut self, id: NodeId) -> Result<(), DagError> {
        let node = self.try_node(id)?;
        let out = match &node.op {
            Op::Source | Op::Constant => return Ok(()),
            Op::Add(a, b) => zip_map(&self.val(*a), &self.val(*b), |x, y| x + y),
            Op::Sub(a, b) => zip_map(&self.val(*a), &self.val(*b), |x, y| x - y),
            Op::Mul(a, b) => zip_map(&self.val(*a), &self.val(*b), |x, y| x * y),
            Op::Div(a, b) => zip_map(&self.val(*a), &self.val(*b), |x, y| x / y),
            Op::Neg(a) => map(&self.val(*a), |x| -x),
            Op::Scale(a, c) => {
                let c = *c;
                map(&self.val(*a), |x| c * x)
            }
            Op::Square(a) => map(&self.val(*a), |x| x * x),
            Op::Exp(a) => map(&self.val(*a), f64::exp),
            Op::Log(a) => map(&self.val(*a), f64::ln),
            Op::Tanh(a) => map(&self.val(*a), f64::tanh),
            Op::Sum(a) => vec![sum(&self.val(*a))],
            Op::Broadcast(a) => vec![self.val(*a)[0]; node.len()],
            Op::MatMul(a, b) => {
                let (m, k) = self.shape(*a);
                let n = self.shape(*b).1;
                matmul_kernel(&self.val(*a), &self.val(*b), m, k, n)
            }
            Op::Transpose(a) => {
                let (rows, cols) = self.shape(*a);
                transpose_kernel(&self.val(*a), rows, cols)
            }
            Op::RowSelect { table, rows } => {
                let cols = self.nodes[table.0].cols;
                gather_rows(&self.val(*table), cols, rows)
            }
        };
        self.nodes[id.0].value.copy_from_slice(&out)
    }

    /// Adds the chain-rule contribution `gradient(id) · d(id)/d(parent)` into every
    /// parent's gradient.
    ///
    /// Must run after every consumer of `id` has run its own bprop.
    pub fn bprop(&mut self, id: NodeId) -> Result<(), DagError> {
        let node = self.try_node(id)?;
        if node.is_leaf() {
            return Ok(());
        }
        let gy = node.gradient_vec();
        let contributions = match &node.op {
            Op::Source | Op::Constant => Vec::new(),
            Op::Add(a, b) => vec![
                (*a, Contribution::Dense(gy.clone())),
                (*b, Contribution::Dense(gy)),
            ],
            Op::Sub(a, b) => vec![
                (*a, Contribution::Dense(gy.clone())),
                (*b, Contribution::Dense(map(&gy, |g| -g))),
            ],
            Op::Mul(a, b) => {
                let da = zip_map(&gy, &self.val(*b), |g, y| g * y);
                let db = zip_map(&gy, &self.val(*a), |g, x| g * x);
                vec![(*a, Contribution::Dense(da)), (*b, Contribution::Dense(db))]
            }
            Op::Div(a, b) => {
                let y = node.value_vec();
                let vb = self.val(*b).to_vec();
                let da = zip_map(&gy, &vb, |g, d| g / d);
                let db = zip3_map(&gy, &y, &vb, |g, q, d| -g * q / d);
                vec![(*a, Contribution::Dense(da)), (*b, Contribution::Dense(db))]
            }
            Op::Neg(a) => vec![(*a, Contribution::Dense(map(&gy, |g| -g)))],
            Op::Scale(a, c) => {
                let c = *c;
                vec![(*a, Contribution::Dense(map(&gy, |g| c * g)))]
            }
            Op::Square(a) => {
                let da = zip_map(&gy, &self.val(*a), |g, x| 2.0 * x * g);
                vec![(*a, Contribution::Dense(da))]
            }
            Op::Exp(a) => {
                let da = zip_map(&gy, &node.value(), |g, y| g * y);
                vec![(*a, Contribution::Dense(da))]
            }
            Op::Log(a) => {
                let da = zip_map(&gy, &self.val(*a), |g, x| g / x);
                vec![(*a, Contribution::Dense(da))]
            }
            Op::Tanh(a) => {
                let da = zip_map(&gy, &node.value(), |g, y| g * (1.0 - y * y));
                vec![(*a, Contribution::Dense(da))]
            }
            Op::Sum(a) => {
                let len = self.nodes[a.0].len();
                vec![(*a, Contribution::Dense(vec![gy[0]; len]))]
            }
            Op::Broadcast(a) => vec![(*a, Contribution::Dense(vec![sum(&gy)]))],
            Op::MatMul(a, b) => {
                let (m, k) = self.shape(*a);
                let n = self.shape(*b).1;
                let bt = transpose_kernel(&self.val(*b), k, n);
                let at = transpose_kernel(&self.val(*a), m, k);
                let da = matmul_kernel(&gy, &bt, m, n, k);
                let db = matmul_kernel(&at, &gy, k, m, n);
                vec![(*a, Contribution::Dense(da)), (*b, Contribution::Dense(db))]
            }
            Op::Transpose(a) => {
                vec![(*a, Contribution::Dense(transpose_kernel(&gy, node.rows, node.cols)))]
            }
            Op::RowSelect { table, rows } => {
                vec![(*table, row_contributions(rows, &gy, node.cols))]
            }
        };
        trace!("bprop {} ({})", id, self.nodes[id.0].kind());
        for (parent, contribution) in contributions {
            let target = &mut self.nodes[parent.0];
            match contribution {
                Contribution::Dense(data) => target.accumulate_gradient(&data)?,
                Contribution::Rows(rows) => {
                    for (row, data) in rows {
                        target.accumulate_gradient_row(row, &data)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Propagates the diagonal-Hessian estimate of `id` into its parents:
    ///
    /// `d²C/dx² ≈ (dy/dx)² · d²C/dy² + dC/dy · d²y/dx²`
    ///
    /// Reads the gradient accumulated by a previous bprop pass and this node's
    /// diagonal-Hessian buffer (treated as zero when never written). Cross terms
    /// between different elements are dropped.
    pub fn bbprop(&mut self, id: NodeId) -> Result<(), DagError> {
        let node = self.try_node(id)?;
        if node.is_leaf() {
            return Ok(());
        }
        let gy = node.gradient_vec();
        let hy = node
            .diag_hessian
            .clone()
            .unwrap_or_else(|| vec![0.0; node.len()]);
        let contributions = match &node.op {
            Op::Source | Op::Constant => Vec::new(),
            Op::Add(a, b) | Op::Sub(a, b) => vec![
                (*a, Contribution::Dense(hy.clone())),
                (*b, Contribution::Dense(hy)),
            ],
            Op::Mul(a, b) => {
                let ha = zip_map(&hy, &self.val(*b), |h, y| y * y * h);
                let hb = zip_map(&hy, &self.val(*a), |h, x| x * x * h);
                vec![(*a, Contribution::Dense(ha)), (*b, Contribution::Dense(hb))]
            }
            Op::Div(a, b) => {
                let y = node.value_vec();
                let vb = self.val(*b).to_vec();
                let ha = zip_map(&hy, &vb, |h, d| h / (d * d));
                let curvature = zip3_map(&gy, &y, &vb, |g, q, d| g * 2.0 * q / (d * d));
                let hb = zip3_map(&hy, &y, &vb, |h, q, d| (q / d) * (q / d) * h);
                let hb = zip_map(&hb, &curvature, |x, c| x + c);
                vec![(*a, Contribution::Dense(ha)), (*b, Contribution::Dense(hb))]
            }
            Op::Neg(a) => vec![(*a, Contribution::Dense(hy))],
            Op::Scale(a, c) => {
                let c2 = c * c;
                vec![(*a, Contribution::Dense(map(&hy, |h| c2 * h)))]
            }
            Op::Square(a) => {
                let ha = zip3_map(&hy, &gy, &self.val(*a), |h, g, x| 4.0 * x * x * h + 2.0 * g);
                vec![(*a, Contribution::Dense(ha))]
            }
            Op::Exp(a) => {
                let ha = zip3_map(&hy, &gy, &node.value(), |h, g, y| y * y * h + g * y);
                vec![(*a, Contribution::Dense(ha))]
            }
            Op::Log(a) => {
                let ha = zip3_map(&hy, &gy, &self.val(*a), |h, g, x| (h - g) / (x * x));
                vec![(*a, Contribution::Dense(ha))]
            }
            Op::Tanh(a) => {
                let ha = zip3_map(&hy, &gy, &node.value(), |h, g, y| {
                    let d = 1.0 - y * y;
                    d * d * h - 2.0 * g * y * d
                });
                vec![(*a, Contribution::Dense(ha))]
            }
            Op::Sum(a) => {
                let len = self.nodes[a.0].len();
                vec![(*a, Contribution::Dense(vec![hy[0]; len]))]
            }
            Op::Broadcast(a) => vec![(*a, Contribution::Dense(vec![sum(&hy)]))],
            Op::MatMul(a, b) => {
                let (m, k) = self.shape(*a);
                let n = self.shape(*b).1;
                let b2t = transpose_kernel(&map(&self.val(*b), |x| x * x), k, n);
                let a2t = transpose_kernel(&map(&self.val(*a), |x| x * x), m, k);
                let ha = matmul_kernel(&hy, &b2t, m, n, k);
                let hb = matmul_kernel(&a2t, &hy, k, m, n);
                vec![(*a, Contribution::Dense(ha)), (*b, Contribution::Dense(hb))]
            }
            Op::Transpose(a) => {
                vec![(*a, Contribution::Dense(transpose_kernel(&hy, node.rows, node.cols)))]
            }
            Op::RowSelect { table, rows } => {
                vec![(*table, row_contributions(rows, &hy, node.cols))]
            }
        };
        for (parent, contribution) in contributions {
            let target = &mut self.nodes[parent.0];
            match contribution {
                Contribution::Dense(data) => target.accumulate_diag_hessian(&data),
                Contribution::Rows(rows) => {
                    for (row, data) in rows {
                        target.accumulate_diag_hessian_row(row, &data);
                    }
                }
            }
        }
        Ok(())
    }

    /// R-operator: computes the forward sensitivity of `id` from its parents'
    /// sensitivities, `R{y} = Σ_p (dy/dp) · R{p}`.
    ///
    /// Parents that never received a sensitivity count as zero. Leaves keep whatever
    /// sensitivity the caller assigned.
    pub fn rfprop(&mut self, id: NodeId) -> Result<(), DagError> {
        let node = self.try_node(id)?;
        let out = match &node.op {
            Op::Source | Op::Constant => return Ok(()),
            Op::Add(a, b) => zip_map(&self.r_or_zeros(*a), &self.r_or_zeros(*b), |x, y| x + y),
            Op::Sub(a, b) => zip_map(&self.r_or_zeros(*a), &self.r_or_zeros(*b), |x, y| x - y),
            Op::Mul(a, b) => {
                let left = zip_map(&self.r_or_zeros(*a), &self.val(*b), |r, y| r * y);
                let right = zip_map(&self.val(*a), &self.r_or_zeros(*b), |x, r| x * r);
                zip_map(&left, &right, |l, r| l + r)
            }
            Op::Div(a, b) => {
                let ra = self.r_or_zeros(*a);
                let rb = self.r_or_zeros(*b);
                let num = zip3_map(&ra, &node.value(), &rb, |r, q, s| r - q * s);
                zip_map(&num, &self.val(*b), |x, d| x / d)
            }
            Op::Neg(a) => map(&self.r_or_zeros(*a), |r| -r),
            Op::Scale(a, c) => {
                let c = *c;
                map(&self.r_or_zeros(*a), |r| c * r)
            }
            Op::Square(a) => zip_map(&self.r_or_zeros(*a), &self.val(*a), |r, x| 2.0 * x * r),
            Op::Exp(a) => zip_map(&self.r_or_zeros(*a), &node.value(), |r, y| y * r),
            Op::Log(a) => zip_map(&self.r_or_zeros(*a), &self.val(*a), |r, x| r / x),
            Op::Tanh(a) => zip_map(&self.r_or_zeros(*a), &node.value(), |r, y| (1.0 - y * y) * r),
            Op::Sum(a) => vec![sum(&self.r_or_zeros(*a))],
            Op::Broadcast(a) => vec![self.r_or_zeros(*a)[0]; node.len()],
            Op::MatMul(a, b) => {
                let (m, k) = self.shape(*a);
                let n = self.shape(*b).1;
                let left = matmul_kernel(&self.r_or_zeros(*a), &self.val(*b), m, k, n);
                let right = matmul_kernel(&self.val(*a), &self.r_or_zeros(*b), m, k, n);
                zip_map(&left, &right, |l, r| l + r)
            }
            Op::Transpose(a) => {
                let (rows, cols) = self.shape(*a);
                transpose_kernel(&self.r_or_zeros(*a), rows, cols)
            }
            Op::RowSelect { table, rows } => {
                let cols = self.nodes[table.0].cols;
                gather_rows(&self.r_or_zeros(*table), cols, rows)
            }
        };
        self.nodes[id.0].r_value = Some(out);
        Ok(())
    }
}

#[cfg(test)]
#[path = "propagation_test.rs"]
mod tests;
