//! # Least-squares Hessian
//!
//! Builds the least-squares cost `||A·x - b||²` for a random `A` and prints its
//! Hessian w.r.t. `x` (`2 AᵀA`) next to a Hessian-vector product computed with the
//! R-operator and the bbprop diagonal approximation.
//!
//! ## Running
//! `cargo run --example least_squares_hessian`

use dagflow_core::{DagError, Function, Graph};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn main() -> Result<(), DagError> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut graph = Graph::new();

    let a = graph.randn(4, 3, 0.0, 1.0, &mut rng)?;
    let x = graph.source(3, 1, vec![0.5, -0.25, 1.0])?;
    let b = graph.constant(4, 1, vec![1.0, 0.0, -1.0, 2.0])?;
    let ax = graph.matmul(a, x)?;
    let cost = graph.squared_error(ax, b)?;

    let mut function = Function::new(&graph, [x], [cost])?;
    let input = function.inputs().to_vec(&graph);

    let (value, gradient, hessian) = function.evaluate_with_gradient_and_hessian(&mut graph, &input)?;
    println!("cost = {:.6}", value[0]);
    println!("gradient = {:?}", gradient);
    let n = gradient.len();
    for row in hessian.chunks(n) {
        println!("  {:?}", row);
    }

    let direction = vec![1.0, 0.0, -1.0];
    let hv = function.hessian_vector_product(&mut graph, &input, &direction)?;
    println!("H·v = {:?}", hv);

    // bbprop drops cross terms, which vanish on the diagonal of a squared linear map.
    let diag = function.diag_hessian(&mut graph, &input)?;
    let exact: Vec<f64> = (0..n).map(|i| hessian[i * n + i]).collect();
    println!("bbprop diagonal = {:?}", diag);
    println!("exact diagonal  = {:?}", exact);
    Ok(())
}
