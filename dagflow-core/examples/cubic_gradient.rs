//! # Cubic gradient
//!
//! Builds `f = z * z²` with a shared sub-expression, evaluates it, prints its
//! gradient from reverse accumulation and from the symbolic derivative, and checks
//! both against finite differences.
//!
//! ## Running
//! `cargo run --example cubic_gradient`

use dagflow_core::{DagError, Function, GradCheckConfig, Graph};

fn main() -> Result<(), DagError> {
    let mut graph = Graph::new();
    let z = graph.scalar(3.0);
    graph.set_name(z, "z");
    let x = graph.square(z)?;
    let f = graph.mul(z, x)?;
    graph.set_name(f, "f");

    let mut function = Function::new(&graph, [z], [f])?;
    println!(
        "forward path: {} nodes, parameters: {}",
        function.forward_path().len(),
        function.parameters().len()
    );

    for input in [1.0, 2.0, 3.0] {
        let (value, gradient) = function.evaluate_with_gradient(&mut graph, &[input], &[1.0])?;
        println!("z = {input}: f = {}, df/dz = {}", value[0], gradient[0]);
    }

    let derivative = function.differentiate(&mut graph)?.clone();
    let symbolic = derivative.evaluate(&mut graph, &[3.0])?;
    println!("symbolic df/dz at 3 = {}", symbolic[0]);

    let config = GradCheckConfig::default();
    let check = function.verify_gradient(&mut graph, &[3.0], config.step)?;
    println!(
        "gradient check: max relative error {:e} ({})",
        check.max_relative_error,
        if check.passed(config.tolerance) { "ok" } else { "FAILED" }
    );
    Ok(())
}
