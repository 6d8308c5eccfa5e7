//! # Function
//!
//! A [`Function`] packages the input, parameter and output nodes of a [`Graph`]
//! together with the propagation paths connecting them, and exposes the numeric
//! API consumed by optimizers and tests: evaluation, gradients, Hessians,
//! symbolic differentiation, instantiation on new inputs and finite-difference
//! verification.
//!
//! Paths are computed once, at construction. Adding nodes to the graph does not
//! invalidate them, but re-wiring the nodes a function spans does: call
//! [`Function::rebuild`] afterwards.

use log::{debug, warn};

use crate::autograd::grad_check::{numeric_gradient, numeric_jacobian};
use crate::autograd::{GradientCheck, PathBuilder};
use crate::error::DagError;
use crate::graph::{CopiesMap, Graph};
use crate::node_array::NodeArray;
use crate::ops::Op;

/// How the cached paths were derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathMode {
    /// The forward path starts at the inputs; the backward path starts at the
    /// inputs and the parameters.
    #[default]
    FromInputs,
    /// Both paths start at the inputs and the parameters. Chosen automatically
    /// when no output depends on the inputs.
    InputsAndParameters,
}

#[derive(Debug, Clone)]
pub struct Function {
    inputs: NodeArray,
    parameters: NodeArray,
    outputs: NodeArray,
    forward_path: NodeArray,
    backward_path: NodeArray,
    parents_path: NodeArray,
    mode: PathMode,
    requested_mode: Option<PathMode>,
    derivative: Option<Box<Function>>,
}

impl Function {
    // --- Construction ---

    /// Creates a function whose parameters are every source node the outputs depend
    /// on without going through an input. Constants are never parameters, and
    /// neither are the sources behind an intermediate input, whose value is
    /// overwritten on every call.
    ///
    /// # Errors
    /// Returns `DagError::InvalidNode` for a handle the graph did not issue.
    pub fn new(
        graph: &Graph,
        inputs: impl Into<NodeArray>,
        outputs: impl Into<NodeArray>,
    ) -> Result<Self, DagError> {
        let inputs = inputs.into();
        let outputs = outputs.into();
        Self::check_handles(graph, &inputs)?;
        Self::check_handles(graph, &outputs)?;
        let parameters: NodeArray = PathBuilder::new(graph)
            .sources_from(&inputs, &outputs)
            .into_iter()
            .filter(|&id| matches!(graph[id].op(), Op::Source))
            .collect();
        Ok(Self::assemble(graph, inputs, parameters, outputs, None))
    }

    /// Creates a function with an explicit parameter list. A parameter listed
    /// twice is kept once, so updates step it a single time.
    pub fn with_parameters(
        graph: &Graph,
        inputs: impl Into<NodeArray>,
        parameters: impl Into<NodeArray>,
        outputs: impl Into<NodeArray>,
    ) -> Result<Self, DagError> {
        let inputs = inputs.into();
        let parameters = parameters.into().distinct();
        let outputs = outputs.into();
        Self::check_handles(graph, &inputs)?;
        Self::check_handles(graph, &parameters)?;
        Self::check_handles(graph, &outputs)?;
        Ok(Self::assemble(graph, inputs, parameters, outputs, None))
    }

    /// Forces the path mode instead of letting construction pick it.
    pub fn with_mode(mut self, graph: &Graph, mode: PathMode) -> Self {
        self.requested_mode = Some(mode);
        self.rebuild(graph);
        self
    }

    fn check_handles(graph: &Graph, nodes: &NodeArray) -> Result<(), DagError> {
        for &id in nodes {
            graph.try_node(id)?;
        }
        Ok(())
    }

    fn assemble(
        graph: &Graph,
        inputs: NodeArray,
        parameters: NodeArray,
        outputs: NodeArray,
        requested_mode: Option<PathMode>,
    ) -> Self {
        let mut function = Function {
            inputs,
            parameters,
            outputs,
            forward_path: NodeArray::new(),
            backward_path: NodeArray::new(),
            parents_path: NodeArray::new(),
            mode: PathMode::FromInputs,
            requested_mode,
            derivative: None,
        };
        function.rebuild(graph);
        function
    }

    /// Recomputes every cached path and drops the cached derivative.
    pub fn rebuild(&mut self, graph: &Graph) {
        let builder = PathBuilder::new(graph);
        let with_parameters = self.inputs.union(&self.parameters);
        let from_inputs = builder.path(&self.inputs, &self.outputs);

        self.mode = match self.requested_mode {
            Some(mode) => mode,
            None if from_inputs.is_empty() && !self.parameters.is_empty() => {
                if self.inputs.is_empty() {
                    debug!("no inputs: paths start at the parameters");
                } else {
                    warn!(
                        "none of the {} outputs depends on the {} inputs; building paths from inputs and parameters",
                        self.outputs.len(),
                        self.inputs.len()
                    );
                }
                PathMode::InputsAndParameters
            }
            None => PathMode::FromInputs,
        };

        let (forward, boundary) = match self.mode {
            PathMode::FromInputs => (from_inputs, self.inputs.clone()),
            PathMode::InputsAndParameters => (
                builder.path(&with_parameters, &self.outputs),
                with_parameters.clone(),
            ),
        };
        self.backward_path = builder.path(&with_parameters, &self.outputs);
        self.parents_path = builder.parents_path(&boundary, &forward, &self.outputs);
        self.forward_path = forward;
        self.derivative = None;
        debug!(
            "function paths ({:?}): forward {}, backward {}, parents {}",
            self.mode,
            self.forward_path.len(),
            self.backward_path.len(),
            self.parents_path.len()
        );
    }

    // --- Accessors ---

    pub fn inputs(&self) -> &NodeArray {
        &self.inputs
    }

    pub fn parameters(&self) -> &NodeArray {
        &self.parameters
    }

    pub fn outputs(&self) -> &NodeArray {
        &self.outputs
    }

    pub fn forward_path(&self) -> &NodeArray {
        &self.forward_path
    }

    pub fn backward_path(&self) -> &NodeArray {
        &self.backward_path
    }

    pub fn parents_path(&self) -> &NodeArray {
        &self.parents_path
    }

    pub fn path_mode(&self) -> PathMode {
        self.mode
    }

    /// The cached symbolic derivative, if [`differentiate`](Self::differentiate) ran.
    pub fn derivative(&self) -> Option<&Function> {
        self.derivative.as_deref()
    }

    pub fn input_len(&self, graph: &Graph) -> usize {
        self.inputs.n_elems(graph)
    }

    pub fn output_len(&self, graph: &Graph) -> usize {
        self.outputs.n_elems(graph)
    }

    // --- Evaluation ---

    /// Copies `input` into the inputs, recomputes the function and returns the
    /// concatenated output values.
    ///
    /// # Errors
    /// Returns `DagError::LengthMismatch` if `input` does not match the inputs.
    pub fn evaluate(&self, graph: &mut Graph, input: &[f64]) -> Result<Vec<f64>, DagError> {
        self.inputs.copy_from(graph, input)?;
        self.parents_path.fprop(graph)?;
        self.forward_path.fprop(graph)?;
        Ok(self.outputs.to_vec(graph))
    }

    fn check_missing(&self, graph: &Graph, operation: &str) -> Result<(), DagError> {
        for &id in &self.outputs {
            if graph[id].value().iter().any(|v| v.is_nan()) {
                return Err(DagError::MissingValue {
                    node: id,
                    operation: operation.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Evaluates the function, then back-propagates `output_gradient` (laid out like
    /// the outputs) and returns `(outputs, gradient w.r.t. the inputs)`.
    ///
    /// Gradients along the backward path, of the inputs and of the outputs are
    /// cleared first. Parameter gradients are not: they keep accumulating until the
    /// caller clears them.
    ///
    /// # Errors
    /// * `DagError::MissingValue` if an output is NaN.
    /// * `DagError::LengthMismatch` if `input` or `output_gradient` have the wrong length.
    pub fn evaluate_with_gradient(
        &self,
        graph: &mut Graph,
        input: &[f64],
        output_gradient: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>), DagError> {
        let output = self.evaluate(graph, input)?;
        self.check_missing(graph, "evaluate_with_gradient")?;

        self.backward_path.clear_gradient(graph);
        self.inputs.clear_gradient(graph);
        self.outputs.clear_gradient(graph);
        // Seeding accumulates, so an output listed twice receives both seeds.
        self.outputs.accumulate_gradient_from(graph, output_gradient)?;
        self.backward_path.bprop_reverse(graph)?;

        Ok((output, self.inputs.gradient_to_vec(graph)))
    }

    /// Returns `(output, gradient, hessian)` of a single scalar output w.r.t. the
    /// inputs. The Hessian is `n x n` row-major, with `n = input_len()`, and is built
    /// one backward pass over the derivative per row.
    ///
    /// # Errors
    /// Same as [`differentiate`](Self::differentiate) and
    /// [`evaluate_with_gradient`](Self::evaluate_with_gradient).
    pub fn evaluate_with_gradient_and_hessian(
        &mut self,
        graph: &mut Graph,
        input: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), DagError> {
        self.differentiate(graph)?;
        let output = self.evaluate(graph, input)?;
        let derivative = self.cached_derivative()?;
        let gradient = derivative.evaluate(graph, input)?;

        let n = gradient.len();
        let mut hessian = vec![0.0; n * n];
        let mut seed = vec![0.0; n];
        for i in 0..n {
            seed[i] = 1.0;
            let (_, row) = derivative.evaluate_with_gradient(graph, input, &seed)?;
            seed[i] = 0.0;
            hessian[i * n..(i + 1) * n].copy_from_slice(&row);
        }
        Ok((output, gradient, hessian))
    }

    fn cached_derivative(&self) -> Result<&Function, DagError> {
        self.derivative
            .as_deref()
            .ok_or_else(|| DagError::InternalError("derivative was not built".to_string()))
    }

    // --- Symbolic differentiation ---

    /// Builds (once) the function mapping the inputs to the gradient of the single
    /// scalar output w.r.t. each input, as new nodes of `graph`.
    ///
    /// Inputs the output does not depend on get a zero constant as their gradient.
    ///
    /// # Errors
    /// * `DagError::MultipleOutputs` unless there is exactly one output.
    /// * `DagError::NotScalar` if that output is not 1x1.
    /// * `DagError::Unsupported` if the path crosses an operator without a symbolic rule.
    pub fn differentiate(&mut self, graph: &mut Graph) -> Result<&Function, DagError> {
        if self.derivative.is_none() {
            let derivative = self.build_derivative(graph)?;
            self.derivative = Some(Box::new(derivative));
        }
        self.cached_derivative()
    }

    fn build_derivative(&self, graph: &mut Graph) -> Result<Function, DagError> {
        if self.outputs.len() != 1 {
            return Err(DagError::MultipleOutputs {
                count: self.outputs.len(),
            });
        }
        let output = self.outputs.as_slice()[0];
        let (rows, cols) = graph.shape(output);
        if rows * cols != 1 {
            return Err(DagError::NotScalar {
                rows,
                cols,
                operation: "Function::differentiate".to_string(),
            });
        }

        let ancestors = PathBuilder::new(graph).ancestors(&self.outputs);
        for &id in &ancestors {
            graph[id].g = None;
        }
        let seed = graph.constant_scalar(1.0);
        graph[output].g = Some(seed);
        self.forward_path.symbolic_bprop_reverse(graph)?;

        let mut gradients = NodeArray::new();
        for &input in &self.inputs {
            let g = match graph[input].symbolic_gradient() {
                Some(g) => g,
                None => {
                    let (r, c) = graph.shape(input);
                    graph.constant_filled(r, c, 0.0)
                }
            };
            gradients.push(g);
        }
        debug!(
            "derivative built: {} gradient nodes, graph now holds {} nodes",
            gradients.len(),
            graph.len()
        );
        // A constant gradient (linear function) legitimately does not depend on the
        // inputs, so the mode is fixed rather than inferred.
        Ok(Self::assemble(
            graph,
            self.inputs.clone(),
            self.parameters.clone(),
            gradients,
            Some(PathMode::FromInputs),
        ))
    }

    // --- Cloning ---

    /// Clones the forward path onto `new_inputs` and returns the corresponding
    /// outputs. Parameters and every other node off the path are shared with this
    /// function, so several instances train the same parameters.
    ///
    /// # Errors
    /// * `DagError::LengthMismatch` if the number of new inputs differs.
    /// * `DagError::ShapeMismatch` if a new input's shape differs from the old one.
    pub fn instantiate(&self, graph: &mut Graph, new_inputs: &NodeArray) -> Result<NodeArray, DagError> {
        if new_inputs.len() != self.inputs.len() {
            return Err(DagError::LengthMismatch {
                expected: self.inputs.len(),
                actual: new_inputs.len(),
                operation: "Function::instantiate".to_string(),
            });
        }
        let mut copies = CopiesMap::new();
        for (&old, &new) in self.inputs.iter().zip(new_inputs) {
            let (expected, actual) = (graph.try_node(old)?.shape(), graph.try_node(new)?.shape());
            if expected != actual {
                return Err(DagError::ShapeMismatch {
                    expected,
                    actual,
                    operation: "Function::instantiate".to_string(),
                });
            }
            copies.insert(old, new);
        }

        let cloned: NodeArray = graph
            .clone_nodes(self.forward_path.as_slice(), &mut copies)
            .into();
        cloned.fprop(graph)?;

        let outputs = self
            .outputs
            .iter()
            .map(|&out| match copies.get(&out) {
                Some(&copy) => copy,
                None => {
                    warn!("output {} does not depend on the inputs; the instance shares it", out);
                    out
                }
            })
            .collect();
        Ok(outputs)
    }

    // --- Second order ---

    /// Hessian-vector product `H · direction` of the single scalar output, through
    /// the R-operator over the derivative. The Hessian is never materialized.
    pub fn hessian_vector_product(
        &mut self,
        graph: &mut Graph,
        input: &[f64],
        direction: &[f64],
    ) -> Result<Vec<f64>, DagError> {
        self.differentiate(graph)?;
        let derivative = self.cached_derivative()?;
        derivative.evaluate(graph, input)?;

        derivative.forward_path.clear_r_value(graph);
        derivative.parents_path.clear_r_value(graph);
        derivative.parameters.clear_r_value(graph);
        derivative.inputs.copy_r_value_from(graph, direction)?;
        derivative.forward_path.rfprop(graph)?;

        let mut product = vec![0.0; derivative.output_len(graph)];
        derivative.outputs.copy_r_value_to(graph, &mut product)?;
        Ok(product)
    }

    /// Diagonal-Hessian approximation of the sum of the outputs w.r.t. the inputs,
    /// by bbprop along the backward path. Exact when each output element depends
    /// on each input element through a single elementwise chain.
    ///
    /// Runs a full [`evaluate_with_gradient`](Self::evaluate_with_gradient) first,
    /// with the same side effects.
    pub fn diag_hessian(&self, graph: &mut Graph, input: &[f64]) -> Result<Vec<f64>, DagError> {
        let seed = vec![1.0; self.output_len(graph)];
        self.evaluate_with_gradient(graph, input, &seed)?;

        self.backward_path.clear_diag_hessian(graph);
        self.inputs.clear_diag_hessian(graph);
        self.parameters.clear_diag_hessian(graph);
        self.backward_path.bbprop_reverse(graph)?;

        let mut diag = vec![0.0; self.input_len(graph)];
        self.inputs.copy_diag_hessian_to(graph, &mut diag)?;
        Ok(diag)
    }

    // --- Verification ---

    /// Compares the gradient of the sum of the outputs with central finite
    /// differences of step `step` around `input`.
    ///
    /// The input values are restored before returning.
    pub fn verify_gradient(&self, graph: &mut Graph, input: &[f64], step: f64) -> Result<GradientCheck, DagError> {
        let seed = vec![1.0; self.output_len(graph)];
        let (_, analytic) = self.evaluate_with_gradient(graph, input, &seed)?;
        let numeric = numeric_gradient(|x| Ok(self.evaluate(graph, x)?.iter().sum()), input, step)?;
        self.evaluate(graph, input)?;

        let check = GradientCheck::new(analytic, numeric)?;
        debug!(
            "gradient check over {} inputs: max relative error {:e}",
            check.analytic.len(),
            check.max_relative_error
        );
        Ok(check)
    }

    /// Compares the symbolic Hessian with central finite differences of the
    /// back-propagated gradient. Requires a single scalar output.
    pub fn verify_hessian(&mut self, graph: &mut Graph, input: &[f64], step: f64) -> Result<GradientCheck, DagError> {
        let (_, _, analytic) = self.evaluate_with_gradient_and_hessian(graph, input)?;
        let this = &*self;
        let numeric = numeric_jacobian(
            |x| this.evaluate_with_gradient(graph, x, &[1.0]).map(|(_, g)| g),
            input,
            step,
        )?;
        self.evaluate(graph, input)?;

        let check = GradientCheck::new(analytic, numeric)?;
        debug!(
            "hessian check over {} entries: max relative error {:e}",
            check.analytic.len(),
            check.max_relative_error
        );
        Ok(check)
    }
}

#[cfg(test)]
#[path = "function_test.rs"]
mod tests;
