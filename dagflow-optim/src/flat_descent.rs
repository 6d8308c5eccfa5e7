use crate::{check_learning_rate, check_scalar_cost, measure, scheduled_rate, OptimError, Optimizer};
use dagflow_core::{Function, Graph, NodeArray, SharedBuffer};
use log::debug;

/// Gradient descent over one flat parameter vector.
///
/// On first use the cost's parameters are rebound onto two contiguous buffers, one
/// for values and one for gradients, laid out in parameter order. Nodes and
/// buffers then alias each other, so the optimizer reads and writes whole vectors
/// while the graph keeps seeing its own nodes.
#[derive(Debug, Clone, Default)]
pub struct FlatGradientDescent {
    pub learning_rate: f64,
    pub decrease_constant: f64,
    bound_to: NodeArray,
    values: Option<SharedBuffer>,
    gradients: Option<SharedBuffer>,
    steps_done: usize,
}

impl FlatGradientDescent {
    pub fn new(learning_rate: f64) -> Self {
        FlatGradientDescent {
            learning_rate,
            ..Default::default()
        }
    }

    pub fn with_decrease_constant(mut self, decrease_constant: f64) -> Self {
        self.decrease_constant = decrease_constant;
        self
    }

    pub fn steps_done(&self) -> usize {
        self.steps_done
    }

    /// The flat parameter vector, once bound.
    pub fn values(&self) -> Option<&SharedBuffer> {
        self.values.as_ref()
    }

    /// The flat gradient vector, once bound.
    pub fn gradients(&self) -> Option<&SharedBuffer> {
        self.gradients.as_ref()
    }

    /// Rebinds `params` onto fresh flat buffers unless they are already bound.
    fn bind(&mut self, graph: &mut Graph, params: &NodeArray) -> Result<(SharedBuffer, SharedBuffer), OptimError> {
        if let (Some(values), Some(gradients)) = (&self.values, &self.gradients) {
            if &self.bound_to == params {
                return Ok((values.clone(), gradients.clone()));
            }
        }
        let n = params.n_elems(graph);
        let values = SharedBuffer::zeros(n);
        let gradients = SharedBuffer::zeros(n);
        params.make_shared_value(graph, &values)?;
        params.make_shared_gradient(graph, &gradients)?;
        debug!("FlatGradientDescent bound {} parameters ({} elements)", params.len(), n);

        self.bound_to = params.clone();
        self.values = Some(values.clone());
        self.gradients = Some(gradients.clone());
        Ok((values, gradients))
    }
}

impl Optimizer for FlatGradientDescent {
    fn step(&mut self, graph: &mut Graph, cost: &Function) -> Result<f64, OptimError> {
        check_learning_rate(self.learning_rate, self.decrease_constant)?;
        check_scalar_cost(graph, cost)?;

        let params = cost.parameters();
        let (_, gradients) = self.bind(graph, params)?;
        for &id in params {
            graph[id].clear_gradient_all();
        }
        let value = measure(graph, cost, self.steps_done)?;

        let lr = scheduled_rate(self.learning_rate, self.decrease_constant, self.steps_done);
        let direction = gradients.to_vec();
        let hit = params.update(graph, -lr, &direction, 1.0, 0.0)?;
        debug!(
            "FlatGradientDescent step {}: cost {:.6e}, |g|² {:.3e}{}",
            self.steps_done,
            value,
            direction.iter().map(|g| g * g).sum::<f64>(),
            if hit { ", bounds hit" } else { "" }
        );
        self.steps_done += 1;
        Ok(value)
    }
}
