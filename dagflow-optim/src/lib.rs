//! # dagflow-optim
//!
//! Gradient-based optimizers that train the parameters of a scalar cost
//! [`Function`](dagflow_core::Function) in place.

use dagflow_core::{DagError, Function, Graph};
use thiserror::Error;

pub mod flat_descent;
pub mod gradient_descent;

pub use flat_descent::FlatGradientDescent;
pub use gradient_descent::GradientDescent;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimError {
    #[error(transparent)]
    Graph(#[from] DagError),

    #[error("Invalid hyper-parameter {name}: {value}")]
    InvalidHyperParameter { name: &'static str, value: f64 },

    #[error("Cost function must have a single scalar output, got {0} elements")]
    NonScalarCost(usize),

    #[error("Cost became non-finite ({value}) at step {step}")]
    Diverged { value: f64, step: usize },
}

/// Common interface of the optimizers.
pub trait Optimizer {
    /// Performs one update of the cost's parameters and returns the cost measured
    /// before the update.
    ///
    /// The cost inputs keep whatever values they currently hold.
    fn step(&mut self, graph: &mut Graph, cost: &Function) -> Result<f64, OptimError>;

    /// Runs `n_steps` steps and returns the last cost seen, or NaN when `n_steps`
    /// is zero.
    fn optimize(&mut self, graph: &mut Graph, cost: &Function, n_steps: usize) -> Result<f64, OptimError> {
        let mut last = f64::NAN;
        for _ in 0..n_steps {
            last = self.step(graph, cost)?;
        }
        Ok(last)
    }
}

pub(crate) fn check_scalar_cost(graph: &Graph, cost: &Function) -> Result<(), OptimError> {
    let n = cost.output_len(graph);
    if n != 1 {
        return Err(OptimError::NonScalarCost(n));
    }
    Ok(())
}

pub(crate) fn check_learning_rate(learning_rate: f64, decrease_constant: f64) -> Result<(), OptimError> {
    if !learning_rate.is_finite() || learning_rate <= 0.0 {
        return Err(OptimError::InvalidHyperParameter {
            name: "learning_rate",
            value: learning_rate,
        });
    }
    if !decrease_constant.is_finite() || decrease_constant < 0.0 {
        return Err(OptimError::InvalidHyperParameter {
            name: "decrease_constant",
            value: decrease_constant,
        });
    }
    Ok(())
}

/// `learning_rate / (1 + decrease_constant * t)`.
pub(crate) fn scheduled_rate(learning_rate: f64, decrease_constant: f64, t: usize) -> f64 {
    learning_rate / (1.0 + decrease_constant * t as f64)
}

/// Evaluates the cost and its parameter gradients at the current inputs.
pub(crate) fn measure(graph: &mut Graph, cost: &Function, step: usize) -> Result<f64, OptimError> {
    let input = cost.inputs().to_vec(graph);
    let (output, _) = cost.evaluate_with_gradient(graph, &input, &[1.0])?;
    let value = output[0];
    if !value.is_finite() {
        return Err(OptimError::Diverged { value, step });
    }
    Ok(value)
}
