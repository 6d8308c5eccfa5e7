//! # Traversal and verification
//!
//! * [`path`]: the [`PathBuilder`], computing minimal, correctly ordered node
//!   sequences between inputs and outputs.
//! * [`grad_check`]: central finite differences and the relative-error report used
//!   by `Function::verify_gradient` / `verify_hessian`.

pub mod grad_check;
pub mod path;

pub use grad_check::{GradCheckConfig, GradientCheck};
pub use path::PathBuilder;
