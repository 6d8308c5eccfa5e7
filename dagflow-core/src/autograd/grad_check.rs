use num_traits::Float;

use crate::error::DagError;

/// Settings of a finite-difference check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradCheckConfig {
    /// Perturbation applied on each side of every coordinate.
    pub step: f64,
    /// Largest acceptable relative error.
    pub tolerance: f64,
}

impl Default for GradCheckConfig {
    fn default() -> Self {
        GradCheckConfig {
            step: 1e-6,
            tolerance: 1e-4,
        }
    }
}

/// Elementwise comparison of an analytic derivative with its finite-difference
/// estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientCheck {
    pub analytic: Vec<f64>,
    pub numeric: Vec<f64>,
    pub relative_errors: Vec<f64>,
    pub max_relative_error: f64,
}

impl GradientCheck {
    /// # Errors
    /// Returns `DagError::LengthMismatch` if the two vectors differ in length.
    pub fn new(analytic: Vec<f64>, numeric: Vec<f64>) -> Result<Self, DagError> {
        if analytic.len() != numeric.len() {
            return Err(DagError::LengthMismatch {
                expected: analytic.len(),
                actual: numeric.len(),
                operation: "GradientCheck::new".to_string(),
            });
        }
        let relative_errors: Vec<f64> = analytic
            .iter()
            .zip(&numeric)
            .map(|(&a, &n)| relative_error(a, n))
            .collect();
        // NaN errors must fail the check, so fold with an explicit NaN test.
        let max_relative_error = relative_errors.iter().fold(0.0_f64, |acc, &e| {
            if e.is_nan() || acc.is_nan() {
                f64::NAN
            } else {
                acc.max(e)
            }
        });
        Ok(GradientCheck {
            analytic,
            numeric,
            relative_errors,
            max_relative_error,
        })
    }

    pub fn passed(&self, tolerance: f64) -> bool {
        self.max_relative_error <= tolerance
    }

    /// Index and value of the worst element, if any.
    pub fn worst(&self) -> Option<(usize, f64)> {
        self.relative_errors
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// `2|a - b| / (|a| + |b|)`, with the denominator floored at one so that
/// near-zero derivatives are compared in absolute terms.
pub fn relative_error<T: Float>(a: T, b: T) -> T {
    let two = T::one() + T::one();
    let denom = (a.abs() + b.abs()).max(T::one());
    two * (a - b).abs() / denom
}

/// Central-difference gradient of the scalar function `f` at `x`.
///
/// `f` is called twice per coordinate; `x` is restored before returning.
pub fn numeric_gradient<F>(mut f: F, x: &[f64], step: f64) -> Result<Vec<f64>, DagError>
where
    F: FnMut(&[f64]) -> Result<f64, DagError>,
{
    let mut probe = x.to_vec();
    let mut grad = Vec::with_capacity(x.len());
    for i in 0..x.len() {
        let original = probe[i];
        probe[i] = original + step;
        let plus = f(&probe)?;
        probe[i] = original - step;
        let minus = f(&probe)?;
        probe[i] = original;
        grad.push((plus - minus) / (2.0 * step));
    }
    Ok(grad)
}

/// Central-difference Jacobian of the vector function `f` at `x`, row-major with
/// one row per output element and one column per coordinate of `x`.
pub fn numeric_jacobian<F>(mut f: F, x: &[f64], step: f64) -> Result<Vec<f64>, DagError>
where
    F: FnMut(&[f64]) -> Result<Vec<f64>, DagError>,
{
    let n_in = x.len();
    let mut probe = x.to_vec();
    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(n_in);
    for i in 0..n_in {
        let original = probe[i];
        probe[i] = original + step;
        let plus = f(&probe)?;
        probe[i] = original - step;
        let minus = f(&probe)?;
        probe[i] = original;
        columns.push(
            plus.iter()
                .zip(&minus)
                .map(|(p, m)| (p - m) / (2.0 * step))
                .collect(),
        );
    }
    let n_out = columns.first().map_or(0, Vec::len);
    let mut jacobian = vec![0.0; n_out * n_in];
    for (j, column) in columns.iter().enumerate() {
        for (i, &d) in column.iter().enumerate() {
            jacobian[i * n_in + j] = d;
        }
    }
    Ok(jacobian)
}
