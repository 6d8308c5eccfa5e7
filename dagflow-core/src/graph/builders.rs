use super::Graph;
use crate::error::DagError;
use crate::node::NodeId;
use crate::ops::Op;

impl Graph {
    fn same_shape(&self, a: NodeId, b: NodeId, operation: &str) -> Result<(usize, usize), DagError> {
        let sa = self.try_node(a)?.shape();
        let sb = self.try_node(b)?.shape();
        if sa != sb {
            return Err(DagError::ShapeMismatch {
                expected: sa,
                actual: sb,
                operation: operation.to_string(),
            });
        }
        Ok(sa)
    }

    /// Pushes an operator node and computes its value from the current parents.
    fn push_op(&mut self, op: Op, rows: usize, cols: usize) -> Result<NodeId, DagError> {
        let id = self.push(op, rows, cols, vec![0.0; rows * cols]);
        self.fprop(id)?;
        Ok(id)
    }

    fn unary(&mut self, a: NodeId, op: Op) -> Result<NodeId, DagError> {
        let (rows, cols) = self.try_node(a)?.shape();
        self.push_op(op, rows, cols)
    }

    // --- Elementwise binary ---

    /// Elementwise `a + b`.
    ///
    /// # Errors
    /// Returns `DagError::ShapeMismatch` if the operands differ in shape.
    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, DagError> {
        let (rows, cols) = self.same_shape(a, b, "add")?;
        self.push_op(Op::Add(a, b), rows, cols)
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, DagError> {
        let (rows, cols) = self.same_shape(a, b, "sub")?;
        self.push_op(Op::Sub(a, b), rows, cols)
    }

    /// Elementwise (Hadamard) product.
    pub fn mul(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, DagError> {
        let (rows, cols) = self.same_shape(a, b, "mul")?;
        self.push_op(Op::Mul(a, b), rows, cols)
    }

    pub fn div(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, DagError> {
        let (rows, cols) = self.same_shape(a, b, "div")?;
        self.push_op(Op::Div(a, b), rows, cols)
    }

    // --- Elementwise unary ---

    pub fn neg(&mut self, a: NodeId) -> Result<NodeId, DagError> {
        self.unary(a, Op::Neg(a))
    }

    pub fn scale(&mut self, a: NodeId, factor: f64) -> Result<NodeId, DagError> {
        self.unary(a, Op::Scale(a, factor))
    }

    pub fn square(&mut self, a: NodeId) -> Result<NodeId, DagError> {
        self.unary(a, Op::Square(a))
    }

    pub fn exp(&mut self, a: NodeId) -> Result<NodeId, DagError> {
        self.unary(a, Op::Exp(a))
    }

    /// Natural logarithm. Non-positive elements produce NaN/-inf values, which
    /// `Function` reports as missing values.
    pub fn log(&mut self, a: NodeId) -> Result<NodeId, DagError> {
        self.unary(a, Op::Log(a))
    }

    pub fn tanh(&mut self, a: NodeId) -> Result<NodeId, DagError> {
        self.unary(a, Op::Tanh(a))
    }

    // --- Reductions and shape changes ---

    /// Sum of every element of `a`, as a 1x1 node.
    pub fn sum(&mut self, a: NodeId) -> Result<NodeId, DagError> {
        self.try_node(a)?;
        self.push_op(Op::Sum(a), 1, 1)
    }

    /// Replicates the 1x1 node `a` over a `rows x cols` node.
    ///
    /// # Errors
    /// Returns `DagError::NotScalar` if `a` is not 1x1.
    pub fn broadcast(&mut self, a: NodeId, rows: usize, cols: usize) -> Result<NodeId, DagError> {
        let (ar, ac) = self.try_node(a)?.shape();
        if ar * ac != 1 {
            return Err(DagError::NotScalar {
                rows: ar,
                cols: ac,
                operation: "broadcast".to_string(),
            });
        }
        self.push_op(Op::Broadcast(a), rows, cols)
    }

    /// Matrix product `a · b`.
    ///
    /// # Errors
    /// Returns `DagError::ShapeMismatch` if `a.cols != b.rows`.
    pub fn matmul(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, DagError> {
        let (m, k) = self.try_node(a)?.shape();
        let (kb, n) = self.try_node(b)?.shape();
        if k != kb {
            return Err(DagError::ShapeMismatch {
                expected: (k, n),
                actual: (kb, n),
                operation: format!("matmul of a {m}x{k} left operand"),
            });
        }
        self.push_op(Op::MatMul(a, b), m, n)
    }

    pub fn transpose(&mut self, a: NodeId) -> Result<NodeId, DagError> {
        let (rows, cols) = self.try_node(a)?.shape();
        self.push_op(Op::Transpose(a), cols, rows)
    }

    /// Gathers `rows` of `table` into a `rows.len() x table.cols` node.
    ///
    /// Rows may repeat; their gradients add up in the table.
    ///
    /// # Errors
    /// Returns `DagError::RowOutOfBounds` for an index past the table.
    pub fn row_select(&mut self, table: NodeId, rows: Vec<usize>) -> Result<NodeId, DagError> {
        let (table_rows, cols) = self.try_node(table)?.shape();
        if let Some(&bad) = rows.iter().find(|&&r| r >= table_rows) {
            return Err(DagError::RowOutOfBounds {
                index: bad,
                rows: table_rows,
            });
        }
        let n = rows.len();
        self.push_op(Op::RowSelect { table, rows }, n, cols)
    }

    // --- Composite helpers ---

    /// `sum((a - b)²)`, the usual squared-error cost.
    pub fn squared_error(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, DagError> {
        let diff = self.sub(a, b)?;
        let sq = self.square(diff)?;
        self.sum(sq)
    }

    /// `sum(a ⊙ b)`.
    pub fn dot(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, DagError> {
        let prod = self.mul(a, b)?;
        self.sum(prod)
    }
}
