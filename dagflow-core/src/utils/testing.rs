use crate::graph::Graph;
use crate::node::NodeId;
use approx::abs_diff_eq;

/// Checks that two flat vectors are elementwise within `tolerance`.
/// Panics with the first offending index otherwise.
pub fn check_values_near(actual: &[f64], expected: &[f64], tolerance: f64) {
    assert_eq!(actual.len(), expected.len(), "Data length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        if !abs_diff_eq!(*a, *e, epsilon = tolerance) {
            panic!(
                "Data mismatch at index {}: actual={:?}, expected={:?}, diff={:?}, tolerance={:?}",
                i,
                a,
                e,
                (a - e).abs(),
                tolerance
            );
        }
    }
}

/// Checks the shape and value of a node.
pub fn check_node_near(
    graph: &Graph,
    id: NodeId,
    expected_shape: (usize, usize),
    expected_data: &[f64],
    tolerance: f64,
) {
    assert_eq!(graph[id].shape(), expected_shape, "Shape mismatch for {}", id);
    check_values_near(&graph[id].value(), expected_data, tolerance);
}
