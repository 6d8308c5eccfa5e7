use crate::node::NodeId;
use thiserror::Error;

/// Custom error type for the dagflow engine.
///
/// Every failure inside the engine is structural (a malformed graph, a bad call, a
/// missing operator rule): nothing here is transient, so no variant is retried.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum DagError {
    #[error("Shape mismatch: expected {expected:?}, got {actual:?} during operation {operation}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
        operation: String,
    },

    #[error("Length mismatch: expected {expected}, got {actual} during operation {operation}")]
    LengthMismatch {
        expected: usize,
        actual: usize,
        operation: String,
    },

    #[error("Shared buffer too small: need {required} elements from offset {offset}, buffer holds {actual}")]
    BufferTooSmall {
        required: usize,
        offset: usize,
        actual: usize,
    },

    #[error("Operation {operation} requires a scalar (1x1) node, got {rows}x{cols}")]
    NotScalar {
        rows: usize,
        cols: usize,
        operation: String,
    },

    #[error("differentiate() requires exactly one output, got {count}")]
    MultipleOutputs { count: usize },

    #[error("Operator '{kind}' does not implement {operation}")]
    Unsupported {
        kind: &'static str,
        operation: &'static str,
    },

    #[error("Missing value (NaN) found in node {node:?} during {operation}")]
    MissingValue { node: NodeId, operation: String },

    #[error("Unknown node handle {0:?}")]
    InvalidNode(NodeId),

    #[error("Node {node:?} is listed more than once during operation {operation}")]
    DuplicateNode { node: NodeId, operation: String },

    #[error("Row index {index} out of bounds for a node with {rows} rows")]
    RowOutOfBounds { index: usize, rows: usize },

    #[error("Invalid bounds: min {min} is greater than max {max}")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}
