//! # dagflow-core
//!
//! A dataflow and automatic-differentiation engine. Computations are directed
//! acyclic graphs of nodes held in a [`Graph`] arena; a [`Function`] picks inputs,
//! parameters and outputs in that graph and drives forward evaluation,
//! reverse-mode gradients, forward-mode (R-operator) sensitivities, diagonal-Hessian
//! propagation and symbolic differentiation over cached propagation paths.
//!
//! ```
//! use dagflow_core::{Function, Graph};
//!
//! let mut graph = Graph::new();
//! let z = graph.scalar(3.0);
//! let x = graph.square(z).unwrap();
//! let f = graph.mul(z, x).unwrap();
//!
//! let function = Function::new(&graph, [z], [f]).unwrap();
//! let (value, gradient) = function.evaluate_with_gradient(&mut graph, &[3.0], &[1.0]).unwrap();
//! assert_eq!(value, vec![27.0]);
//! assert_eq!(gradient, vec![27.0]);
//! ```

pub mod autograd;
pub mod buffer;
pub mod error;
pub mod function;
pub mod graph;
pub mod node;
pub mod node_array;
pub mod ops;
pub mod utils;

pub use autograd::{GradCheckConfig, GradientCheck, PathBuilder};
pub use buffer::{BufferView, SharedBuffer};
pub use error::DagError;
pub use function::{Function, PathMode};
pub use graph::{CopiesMap, Graph};
pub use node::{Bounds, Node, NodeId, UpdateStatus, WeightPenalty};
pub use node_array::NodeArray;
pub use ops::Op;

// Re-export traits required by public functions
pub use num_traits;
