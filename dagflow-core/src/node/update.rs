use log::trace;

use super::{Node, RowSpan};
use crate::error::DagError;

/// Penalty applied by [`Node::update_with_weight_decay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightPenalty {
    /// Shrinks every element toward zero by `|step| * decay`, stopping at zero.
    L1,
    /// Adds `decay * value` to the gradient.
    #[default]
    L2,
}

impl Node {
    /// `value += step_size * gradient`, then clamps to the bounds.
    ///
    /// Honors the partial-update policy: with partial updates enabled only the dirty
    /// rows move (none if nothing was accumulated), and the dirty state is reset.
    ///
    /// Returns true if any element hit the box constraint.
    pub fn update(&mut self, step_size: f64) -> bool {
        self.apply_gradient_step(step_size, 0.0, WeightPenalty::L2, false)
    }

    /// Same as [`update`](Self::update), then zeroes the gradient rows that were used.
    pub fn update_and_clear(&mut self, step_size: f64) -> bool {
        self.apply_gradient_step(step_size, 0.0, WeightPenalty::L2, true)
    }

    /// Gradient step with weight decay.
    ///
    /// * L2: `value += step_size * (gradient + weight_decay * value)`.
    /// * L1: `value += step_size * gradient`, then soft-thresholding toward zero by
    ///   `|step_size| * weight_decay`.
    pub fn update_with_weight_decay(
        &mut self,
        step_size: f64,
        weight_decay: f64,
        penalty: WeightPenalty,
        clear_gradient: bool,
    ) -> bool {
        self.apply_gradient_step(step_size, weight_decay, penalty, clear_gradient)
    }

    /// `value += step_size * (coeff * direction + bias)` over every element, then clamps.
    ///
    /// The direction is an explicit vector (e.g. the slice of a flat optimizer
    /// direction), so the partial-update policy does not apply.
    ///
    /// # Errors
    /// Returns `DagError::LengthMismatch` if `direction` does not hold `len()` elements.
    pub fn update_along(
        &mut self,
        step_size: f64,
        direction: &[f64],
        coeff: f64,
        bias: f64,
    ) -> Result<bool, DagError> {
        if direction.len() != self.len() {
            return Err(DagError::LengthMismatch {
                expected: self.len(),
                actual: direction.len(),
                operation: "Node::update_along".to_string(),
            });
        }
        let bounds = self.bounds;
        let mut hit = false;
        let mut value = self.value.write();
        for (v, d) in value.iter_mut().zip(direction) {
            let (clamped, was_out) = bounds.clamp(*v + step_size * (coeff * d + bias));
            *v = clamped;
            hit |= was_out;
        }
        Ok(hit)
    }

    /// Clamps the whole value into the bounds. Returns true if anything moved.
    pub fn apply_bounds(&mut self) -> bool {
        if !self.bounds.is_bounded() {
            return false;
        }
        let bounds = self.bounds;
        let mut hit = false;
        for v in self.value.write().iter_mut() {
            let (clamped, was_out) = bounds.clamp(*v);
            *v = clamped;
            hit |= was_out;
        }
        hit
    }

    fn apply_gradient_step(
        &mut self,
        step_size: f64,
        weight_decay: f64,
        penalty: WeightPenalty,
        clear_gradient: bool,
    ) -> bool {
        let span = self.rows_to_touch();
        let cols = self.cols;
        let ranges: Vec<(usize, usize)> = match &span {
            RowSpan::Nothing => Vec::new(),
            RowSpan::All => vec![(0, self.len())],
            RowSpan::Rows(rows) => rows.iter().map(|&r| (r * cols, (r + 1) * cols)).collect(),
        };

        // The gradient may alias the same buffer as the value: read it out first.
        let grad = self.gradient.to_vec();
        let bounds = self.bounds;
        let shrink = step_size.abs() * weight_decay;
        let mut hit = false;
        {
            let mut value = self.value.write();
            for &(start, end) in &ranges {
                for i in start..end {
                    let v = value[i];
                    let stepped = match penalty {
                        WeightPenalty::L2 => v + step_size * (grad[i] + weight_decay * v),
                        WeightPenalty::L1 => {
                            let moved = v + step_size * grad[i];
                            if moved > 0.0 {
                                (moved - shrink).max(0.0)
                            } else {
                                (moved + shrink).min(0.0)
                            }
                        }
                    };
                    let (clamped, was_out) = bounds.clamp(stepped);
                    value[i] = clamped;
                    hit |= was_out;
                }
            }
        }

        if clear_gradient {
            let mut g = self.gradient.write();
            for &(start, end) in &ranges {
                g[start..end].fill(0.0);
            }
        }
        if let RowSpan::Rows(rows) = &span {
            trace!("partial update of {} rows ({:?})", rows.len(), self.name);
        }
        if self.allows_partial_update {
            self.reset_dirty();
        }
        hit
    }
}
