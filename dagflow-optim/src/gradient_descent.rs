use crate::{check_learning_rate, check_scalar_cost, measure, scheduled_rate, OptimError, Optimizer};
use dagflow_core::{Function, Graph, WeightPenalty};
use log::debug;

/// Stochastic gradient descent over each parameter node's own gradient storage.
///
/// Honors the partial-update policy of the parameters: a table that only received
/// gradient on a few rows is only moved (and decayed) on those rows.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientDescent {
    pub learning_rate: f64,
    /// Step `t` uses `learning_rate / (1 + decrease_constant * t)`.
    pub decrease_constant: f64,
    pub weight_decay: f64,
    pub penalty: WeightPenalty,
    steps_done: usize,
}

impl Default for GradientDescent {
    fn default() -> Self {
        GradientDescent {
            learning_rate: 0.01,
            decrease_constant: 0.0,
            weight_decay: 0.0,
            penalty: WeightPenalty::L2,
            steps_done: 0,
        }
    }
}

impl GradientDescent {
    pub fn new(learning_rate: f64) -> Self {
        GradientDescent {
            learning_rate,
            ..Default::default()
        }
    }

    pub fn with_decrease_constant(mut self, decrease_constant: f64) -> Self {
        self.decrease_constant = decrease_constant;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64, penalty: WeightPenalty) -> Self {
        self.weight_decay = weight_decay;
        self.penalty = penalty;
        self
    }

    pub fn steps_done(&self) -> usize {
        self.steps_done
    }

    /// The learning rate the next step will use.
    pub fn current_learning_rate(&self) -> f64 {
        scheduled_rate(self.learning_rate, self.decrease_constant, self.steps_done)
    }

    /// Restarts the learning-rate schedule.
    pub fn reset(&mut self) {
        self.steps_done = 0;
    }
}

impl Optimizer for GradientDescent {
    fn step(&mut self, graph: &mut Graph, cost: &Function) -> Result<f64, OptimError> {
        check_learning_rate(self.learning_rate, self.decrease_constant)?;
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(OptimError::InvalidHyperParameter {
                name: "weight_decay",
                value: self.weight_decay,
            });
        }
        check_scalar_cost(graph, cost)?;

        let params = cost.parameters();
        params.clear_gradient(graph);
        let value = measure(graph, cost, self.steps_done)?;

        let lr = self.current_learning_rate();
        // Clearing on update leaves the dirty rows zeroed for the next step.
        let hit = params.update_with_weight_decay(graph, -lr, self.weight_decay, self.penalty, true);
        debug!(
            "GradientDescent step {}: cost {:.6e}, learning rate {:.3e}{}",
            self.steps_done,
            value,
            lr,
            if hit { ", bounds hit" } else { "" }
        );
        self.steps_done += 1;
        Ok(value)
    }
}
