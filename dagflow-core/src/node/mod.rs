// src/node/mod.rs

use std::cell::Ref;
use std::fmt;

use crate::buffer::BufferView;
use crate::error::DagError;
use crate::ops::Op;

mod update;

pub use update::WeightPenalty;

/// Stable handle of a node inside its [`Graph`](crate::graph::Graph).
///
/// Handles are plain indices: they stay valid for the lifetime of the graph that
/// issued them and are meaningless for any other graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// Which rows of a partial-update node carry gradient since the last clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateStatus {
    /// No gradient was accumulated.
    #[default]
    None,
    /// Only the rows listed as dirty carry gradient.
    SomeRows,
    /// A dense contribution reached the node: every row is dirty.
    AllRows,
}

/// Box constraint `[min, max]` applied to every element on update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const UNBOUNDED: Bounds = Bounds {
        min: f64::NEG_INFINITY,
        max: f64::INFINITY,
    };

    /// # Errors
    /// Returns `DagError::InvalidBounds` if `min > max` or either bound is NaN.
    pub fn new(min: f64, max: f64) -> Result<Self, DagError> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(DagError::InvalidBounds { min, max });
        }
        Ok(Bounds { min, max })
    }

    pub fn is_bounded(&self) -> bool {
        self.min > f64::NEG_INFINITY || self.max < f64::INFINITY
    }

    /// Clamps `x`; the flag is true when `x` was outside the box.
    pub fn clamp(&self, x: f64) -> (f64, bool) {
        if x < self.min {
            (self.min, true)
        } else if x > self.max {
            (self.max, true)
        } else {
            (x, false)
        }
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Bounds::UNBOUNDED
    }
}

/// One vertex of the dataflow graph.
///
/// `value` and `gradient` always have `rows * cols` elements. Both are views into
/// [`SharedBuffer`](crate::buffer::SharedBuffer)s, so they may alias an optimizer's
/// flat vector after `NodeArray::make_shared_value` / `make_shared_gradient`.
/// The forward-sensitivity (`r_value`) and diagonal-Hessian buffers are only
/// allocated when a propagation first writes them.
#[derive(Debug)]
pub struct Node {
    pub(crate) op: Op,
    pub(crate) name: Option<String>,
    pub(crate) rows: usize,
    pub(crate) cols: usize,
    pub(crate) value: BufferView,
    pub(crate) gradient: BufferView,
    pub(crate) r_value: Option<Vec<f64>>,
    pub(crate) diag_hessian: Option<Vec<f64>>,
    pub(crate) bounds: Bounds,
    pub(crate) allows_partial_update: bool,
    pub(crate) dirty_rows: Vec<usize>,
    pub(crate) update_status: UpdateStatus,
    /// Symbolic gradient slot: the node computing dC/d(this), once built.
    pub(crate) g: Option<NodeId>,
}

impl Node {
    pub(crate) fn new(op: Op, rows: usize, cols: usize, value: Vec<f64>) -> Self {
        let len = rows * cols;
        debug_assert_eq!(value.len(), len);
        Node {
            op,
            name: None,
            rows,
            cols,
            value: BufferView::owned(value),
            gradient: BufferView::zeros(len),
            r_value: None,
            diag_hessian: None,
            bounds: Bounds::UNBOUNDED,
            allows_partial_update: false,
            dirty_rows: Vec::new(),
            update_status: UpdateStatus::None,
            g: None,
        }
    }

    // --- Accessors ---

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn kind(&self) -> &'static str {
        self.op.name()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of elements (`rows * cols`).
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_leaf(&self) -> bool {
        self.op.is_leaf()
    }

    pub fn parents(&self) -> Vec<NodeId> {
        self.op.parents()
    }

    /// Flat, row-major view of the value.
    pub fn value(&self) -> Ref<'_, [f64]> {
        self.value.read()
    }

    pub fn value_vec(&self) -> Vec<f64> {
        self.value.to_vec()
    }

    /// Value of a 1x1 node.
    ///
    /// # Errors
    /// Returns `DagError::NotScalar` for any other shape.
    pub fn scalar(&self) -> Result<f64, DagError> {
        if self.len() != 1 {
            return Err(DagError::NotScalar {
                rows: self.rows,
                cols: self.cols,
                operation: "Node::scalar".to_string(),
            });
        }
        Ok(self.value.read()[0])
    }

    pub fn value_view(&self) -> &BufferView {
        &self.value
    }

    pub fn gradient(&self) -> Ref<'_, [f64]> {
        self.gradient.read()
    }

    pub fn gradient_vec(&self) -> Vec<f64> {
        self.gradient.to_vec()
    }

    pub fn gradient_view(&self) -> &BufferView {
        &self.gradient
    }

    /// Forward sensitivity, if any propagation wrote it.
    pub fn r_value(&self) -> Option<&[f64]> {
        self.r_value.as_deref()
    }

    /// Diagonal-Hessian estimate, if any propagation wrote it.
    pub fn diag_hessian(&self) -> Option<&[f64]> {
        self.diag_hessian.as_deref()
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn symbolic_gradient(&self) -> Option<NodeId> {
        self.g
    }

    pub fn allows_partial_update(&self) -> bool {
        self.allows_partial_update
    }

    pub fn update_status(&self) -> UpdateStatus {
        self.update_status
    }

    pub fn dirty_rows(&self) -> &[usize] {
        &self.dirty_rows
    }

    // --- Mutators ---

    fn check_len(&self, len: usize, operation: &str) -> Result<(), DagError> {
        if len != self.len() {
            return Err(DagError::LengthMismatch {
                expected: self.len(),
                actual: len,
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    pub fn set_value(&mut self, data: &[f64]) -> Result<(), DagError> {
        self.check_len(data.len(), "Node::set_value")?;
        self.value.copy_from_slice(data)
    }

    pub fn set_gradient(&mut self, data: &[f64]) -> Result<(), DagError> {
        self.check_len(data.len(), "Node::set_gradient")?;
        self.gradient.copy_from_slice(data)?;
        self.mark_all_dirty();
        Ok(())
    }

    /// Adds `data` into the whole gradient and marks every row dirty.
    pub fn accumulate_gradient(&mut self, data: &[f64]) -> Result<(), DagError> {
        self.check_len(data.len(), "Node::accumulate_gradient")?;
        self.gradient.add_from_slice(data)?;
        self.mark_all_dirty();
        Ok(())
    }

    /// Adds `data` into one row of the gradient and marks only that row dirty.
    pub fn accumulate_gradient_row(&mut self, row: usize, data: &[f64]) -> Result<(), DagError> {
        if row >= self.rows {
            return Err(DagError::RowOutOfBounds {
                index: row,
                rows: self.rows,
            });
        }
        if data.len() != self.cols {
            return Err(DagError::LengthMismatch {
                expected: self.cols,
                actual: data.len(),
                operation: "Node::accumulate_gradient_row".to_string(),
            });
        }
        {
            let mut grad = self.gradient.write();
            let row_slice = &mut grad[row * self.cols..(row + 1) * self.cols];
            for (g, d) in row_slice.iter_mut().zip(data) {
                *g += *d;
            }
        }
        self.mark_row_dirty(row);
        Ok(())
    }

    pub fn set_r_value(&mut self, data: &[f64]) -> Result<(), DagError> {
        self.check_len(data.len(), "Node::set_r_value")?;
        self.r_value = Some(data.to_vec());
        Ok(())
    }

    pub fn clear_r_value(&mut self) {
        self.r_value = None;
    }

    pub fn set_diag_hessian(&mut self, data: &[f64]) -> Result<(), DagError> {
        self.check_len(data.len(), "Node::set_diag_hessian")?;
        self.diag_hessian = Some(data.to_vec());
        Ok(())
    }

    pub fn clear_diag_hessian(&mut self) {
        self.diag_hessian = None;
    }

    pub(crate) fn accumulate_diag_hessian(&mut self, data: &[f64]) {
        match self.diag_hessian.as_mut() {
            Some(h) => {
                for (x, d) in h.iter_mut().zip(data) {
                    *x += *d;
                }
            }
            None => self.diag_hessian = Some(data.to_vec()),
        }
    }

    pub(crate) fn accumulate_diag_hessian_row(&mut self, row: usize, data: &[f64]) {
        let len = self.len();
        let cols = self.cols;
        let h = self.diag_hessian.get_or_insert_with(|| vec![0.0; len]);
        for (x, d) in h[row * cols..(row + 1) * cols].iter_mut().zip(data) {
            *x += *d;
        }
    }

    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.bounds = bounds;
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Enables or disables row-partial gradient tracking.
    ///
    /// Switching it either way resets the dirty state.
    pub fn set_allows_partial_update(&mut self, allow: bool) {
        self.allows_partial_update = allow;
        self.dirty_rows.clear();
        self.update_status = UpdateStatus::None;
    }

    /// Records that `row` received gradient. No-op unless partial updates are enabled.
    pub fn mark_row_dirty(&mut self, row: usize) {
        if !self.allows_partial_update {
            return;
        }
        match self.update_status {
            UpdateStatus::AllRows => {}
            _ => {
                if !self.dirty_rows.contains(&row) {
                    self.dirty_rows.push(row);
                }
                self.update_status = UpdateStatus::SomeRows;
            }
        }
    }

    /// Records that every row received gradient.
    pub fn mark_all_dirty(&mut self) {
        if self.allows_partial_update {
            self.dirty_rows.clear();
            self.update_status = UpdateStatus::AllRows;
        }
    }

    /// Zeroes the gradient, restricted to the dirty rows when partial updates are on.
    pub fn clear_gradient(&mut self) {
        match self.rows_to_touch() {
            RowSpan::Nothing => {}
            RowSpan::All => self.gradient.fill(0.0),
            RowSpan::Rows(rows) => {
                let cols = self.cols;
                let mut grad = self.gradient.write();
                for r in rows {
                    grad[r * cols..(r + 1) * cols].fill(0.0);
                }
            }
        }
        self.reset_dirty();
    }

    /// Zeroes the gradient everywhere, ignoring the dirty state.
    pub fn clear_gradient_all(&mut self) {
        self.gradient.fill(0.0);
        self.reset_dirty();
    }

    /// Rebinds the value storage to `view`. The view must hold `len()` elements.
    pub(crate) fn rebind_value(&mut self, view: BufferView) {
        debug_assert_eq!(view.len(), self.len());
        self.value = view;
    }

    pub(crate) fn rebind_gradient(&mut self, view: BufferView) {
        debug_assert_eq!(view.len(), self.len());
        self.gradient = view;
    }

    pub(crate) fn rows_to_touch(&self) -> RowSpan {
        if !self.allows_partial_update {
            return RowSpan::All;
        }
        match self.update_status {
            UpdateStatus::None => RowSpan::Nothing,
            UpdateStatus::AllRows => RowSpan::All,
            UpdateStatus::SomeRows => {
                let mut rows = self.dirty_rows.clone();
                rows.sort_unstable();
                rows.dedup();
                RowSpan::Rows(rows)
            }
        }
    }

    pub(crate) fn reset_dirty(&mut self) {
        self.dirty_rows.clear();
        self.update_status = UpdateStatus::None;
    }
}

/// Rows an update or clear has to visit.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RowSpan {
    Nothing,
    All,
    Rows(Vec<usize>),
}

#[cfg(test)]
#[path = "node_test.rs"]
mod tests;
