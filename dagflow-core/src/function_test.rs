use super::*;
use crate::autograd::GradCheckConfig;
use crate::node::NodeId;
use approx::assert_relative_eq;

/// f(z) = z * z², the cubic scenario: f(3) = 27, f'(3) = 27.
fn cubic(g: &mut Graph) -> (NodeId, NodeId) {
    let z = g.scalar(3.0);
    let x = g.square(z).unwrap();
    let f = g.mul(z, x).unwrap();
    (z, f)
}

/// out = sum(tanh(x ⊙ w) + b), with parameters w and b.
fn layer(g: &mut Graph) -> (NodeId, NodeId, NodeId, NodeId) {
    let x = g.source(1, 3, vec![0.2, -0.4, 0.9]).unwrap();
    let w = g.source(1, 3, vec![1.5, 0.5, -1.0]).unwrap();
    let b = g.source(1, 3, vec![0.1, 0.1, 0.1]).unwrap();
    let xw = g.mul(x, w).unwrap();
    let t = g.tanh(xw).unwrap();
    let tb = g.add(t, b).unwrap();
    let out = g.sum(tb).unwrap();
    (x, w, b, out)
}

#[test]
fn test_cubic_value_and_gradient() {
    let mut g = Graph::new();
    let (z, f) = cubic(&mut g);
    let func = Function::new(&g, [z], [f]).unwrap();
    assert_eq!(func.path_mode(), PathMode::FromInputs);
    assert!(func.parameters().is_empty());

    assert_eq!(func.evaluate(&mut g, &[3.0]).unwrap(), vec![27.0]);
    let (out, grad) = func.evaluate_with_gradient(&mut g, &[3.0], &[1.0]).unwrap();
    assert_eq!(out, vec![27.0]);
    assert_eq!(grad, vec![27.0]);
    assert_eq!(g[z].gradient_vec(), vec![27.0]);
}

#[test]
fn test_default_parameters_skip_inputs_and_constants() {
    let mut g = Graph::new();
    let (x, w, b, out) = layer(&mut g);
    let c = g.constant_filled(1, 1, 2.0);
    let scaled = g.mul(out, c).unwrap();
    let func = Function::new(&g, [x], [scaled]).unwrap();
    assert_eq!(func.parameters().len(), 2);
    assert!(func.parameters().contains(w) && func.parameters().contains(b));
    assert!(!func.parameters().contains(c));
    assert!(!func.backward_path().contains(w), "parameters bound the backward path");
}

#[test]
fn test_sources_behind_an_intermediate_input_are_not_parameters() {
    // h = x0 * w is the input; only v sits between h and the output.
    let mut g = Graph::new();
    let x0 = g.source(1, 2, vec![1.0, 2.0]).unwrap();
    let w = g.source(1, 2, vec![0.5, 0.5]).unwrap();
    let h = g.mul(x0, w).unwrap();
    let v = g.source(1, 2, vec![2.0, -1.0]).unwrap();
    let hv = g.mul(h, v).unwrap();
    let sq = g.square(hv).unwrap();
    let f = g.sum(sq).unwrap();

    let func = Function::new(&g, [h], [f]).unwrap();
    assert_eq!(func.parameters().as_slice(), &[v]);
    assert_eq!(func.path_mode(), PathMode::FromInputs);
    assert!(!func.backward_path().contains(h));

    let bare = g.square(h).unwrap();
    let cost = g.sum(bare).unwrap();
    let func = Function::new(&g, [h], [cost]).unwrap();
    assert!(func.parameters().is_empty());
}

#[test]
fn test_explicit_parameters_are_kept_once() {
    let mut g = Graph::new();
    let (x, w, b, out) = layer(&mut g);
    let func = Function::with_parameters(&g, [x], [w, b, w], [out]).unwrap();
    assert_eq!(func.parameters().as_slice(), &[w, b]);
    assert_eq!(func.parameters().n_elems(&g), 6);
}

#[test]
fn test_parameter_gradients_accumulate_until_cleared() {
    let mut g = Graph::new();
    let (x, _w, b, out) = layer(&mut g);
    let func = Function::new(&g, [x], [out]).unwrap();
    let input = g[x].value_vec();

    func.evaluate_with_gradient(&mut g, &input, &[1.0]).unwrap();
    assert_eq!(g[b].gradient_vec(), vec![1.0; 3]);
    let (_, first) = func.evaluate_with_gradient(&mut g, &input, &[1.0]).unwrap();
    assert_eq!(g[b].gradient_vec(), vec![2.0; 3], "parameters are the caller's to clear");

    // Input gradients are cleared on every call.
    let (_, second) = func.evaluate_with_gradient(&mut g, &input, &[1.0]).unwrap();
    assert_eq!(first, second);

    func.parameters().clear_gradient(&mut g);
    assert_eq!(g[b].gradient_vec(), vec![0.0; 3]);
}

#[test]
fn test_seeding_is_additive() {
    let mut g = Graph::new();
    let x = g.source(1, 2, vec![0.3, 0.7]).unwrap();
    let e = g.exp(x).unwrap();
    let s = g.square(x).unwrap();
    let func = Function::new(&g, [x], [e, s]).unwrap();
    let input = [0.3, 0.7];
    let seed_a = [1.0, 0.0, 0.5, 2.0];
    let seed_b = [-1.0, 3.0, 0.25, 0.0];
    let seed_ab: Vec<f64> = seed_a.iter().zip(&seed_b).map(|(a, b)| a + b).collect();

    let (_, ga) = func.evaluate_with_gradient(&mut g, &input, &seed_a).unwrap();
    let (_, gb) = func.evaluate_with_gradient(&mut g, &input, &seed_b).unwrap();
    let (_, gab) = func.evaluate_with_gradient(&mut g, &input, &seed_ab).unwrap();
    for i in 0..2 {
        assert_relative_eq!(gab[i], ga[i] + gb[i], epsilon = 1e-12);
    }
}

#[test]
fn test_repeated_output_sums_its_seeds() {
    let mut g = Graph::new();
    let x = g.scalar(2.0);
    let y = g.scale(x, 3.0).unwrap();
    let func = Function::new(&g, [x], [y, y]).unwrap();
    let (out, grad) = func.evaluate_with_gradient(&mut g, &[2.0], &[1.0, 2.0]).unwrap();
    assert_eq!(out, vec![6.0, 6.0]);
    assert_eq!(grad, vec![9.0]);
}

#[test]
fn test_evaluate_is_idempotent() {
    let mut g = Graph::new();
    let (x, _, _, out) = layer(&mut g);
    let func = Function::new(&g, [x], [out]).unwrap();
    let first = func.evaluate(&mut g, &[1.0, 2.0, 3.0]).unwrap();
    let second = func.evaluate(&mut g, &[1.0, 2.0, 3.0]).unwrap();
    assert_eq!(first[0].to_bits(), second[0].to_bits());
    assert!(func.evaluate(&mut g, &[1.0]).is_err());
}

#[test]
fn test_parents_path_sees_parameter_updates() {
    let mut g = Graph::new();
    let x = g.scalar(2.0);
    let w = g.scalar(0.0);
    let ew = g.exp(w).unwrap();
    let y = g.mul(x, ew).unwrap();
    let func = Function::new(&g, [x], [y]).unwrap();
    assert_eq!(func.parents_path().as_slice(), &[ew]);

    g[w].set_value(&[1.0]).unwrap();
    let out = func.evaluate(&mut g, &[2.0]).unwrap();
    assert_relative_eq!(out[0], 2.0 * 1.0_f64.exp());
}

#[test]
fn test_parameter_only_outputs_switch_path_mode() {
    let mut g = Graph::new();
    let x = g.scalar(1.0);
    let w = g.scalar(3.0);
    let y = g.square(w).unwrap();
    let func = Function::new(&g, [x], [y]).unwrap();
    assert_eq!(func.path_mode(), PathMode::InputsAndParameters);
    assert_eq!(func.forward_path().as_slice(), &[y]);

    func.evaluate_with_gradient(&mut g, &[1.0], &[1.0]).unwrap();
    assert_eq!(g[w].gradient_vec(), vec![6.0]);
    assert_eq!(g[x].gradient_vec(), vec![0.0]);

    let forced = Function::new(&g, [x], [y]).unwrap().with_mode(&g, PathMode::FromInputs);
    assert_eq!(forced.path_mode(), PathMode::FromInputs);
    assert!(forced.forward_path().is_empty());
    // The output is still refreshed through the parents path.
    g[w].set_value(&[4.0]).unwrap();
    assert_eq!(forced.evaluate(&mut g, &[1.0]).unwrap(), vec![16.0]);
}

#[test]
fn test_nan_output_is_a_missing_value() {
    let mut g = Graph::new();
    let x = g.scalar(1.0);
    let y = g.log(x).unwrap();
    let func = Function::new(&g, [x], [y]).unwrap();
    assert!(func.evaluate_with_gradient(&mut g, &[2.0], &[1.0]).is_ok());
    assert_eq!(
        func.evaluate_with_gradient(&mut g, &[-1.0], &[1.0]),
        Err(DagError::MissingValue {
            node: y,
            operation: "evaluate_with_gradient".to_string(),
        })
    );
}

#[test]
fn test_differentiate_requires_one_scalar_output() {
    let mut g = Graph::new();
    let x = g.source(1, 2, vec![1.0, 2.0]).unwrap();
    let y = g.exp(x).unwrap();
    let s = g.sum(y).unwrap();

    let mut two = Function::new(&g, [x], [s, s]).unwrap();
    assert_eq!(two.differentiate(&mut g).err(), Some(DagError::MultipleOutputs { count: 2 }));

    let mut wide = Function::new(&g, [x], [y]).unwrap();
    assert!(matches!(
        wide.differentiate(&mut g),
        Err(DagError::NotScalar { rows: 1, cols: 2, .. })
    ));
}

#[test]
fn test_differentiate_builds_gradient_function() {
    let mut g = Graph::new();
    let (z, f) = cubic(&mut g);
    let unused = g.scalar(5.0);
    let mut func = Function::new(&g, NodeArray::from([z, unused]), [f]).unwrap();
    let derivative = func.differentiate(&mut g).unwrap().clone();
    assert_eq!(derivative.outputs().len(), 2);

    // f'(z) = 3z², and zero for the unused input.
    assert_eq!(derivative.evaluate(&mut g, &[2.0, 5.0]).unwrap(), vec![12.0, 0.0]);
    let nodes_after_first = g.len();
    func.differentiate(&mut g).unwrap();
    assert_eq!(g.len(), nodes_after_first, "the derivative is cached");

    func.rebuild(&g);
    assert!(func.derivative().is_none());
}

#[test]
fn test_row_select_cannot_be_differentiated_symbolically() {
    let mut g = Graph::new();
    let table = g.source(3, 2, vec![0.0; 6]).unwrap();
    let rows = g.row_select(table, vec![2, 0]).unwrap();
    let s = g.sum(rows).unwrap();
    let mut func = Function::new(&g, [table], [s]).unwrap();
    assert_eq!(
        func.differentiate(&mut g).err(),
        Some(DagError::Unsupported {
            kind: "row_select",
            operation: "symbolic_bprop",
        })
    );
    // The numeric gradient is fine.
    let (_, grad) = func.evaluate_with_gradient(&mut g, &[0.0; 6], &[1.0]).unwrap();
    assert_eq!(grad, vec![1.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
}

#[test]
fn test_hessian_of_polynomial() {
    // f = x0² x1: grad = (2 x0 x1, x0²), H = [[2 x1, 2 x0], [2 x0, 0]]
    let mut g = Graph::new();
    let x0 = g.scalar(1.5);
    let x1 = g.scalar(-2.0);
    let sq = g.square(x0).unwrap();
    let f = g.mul(sq, x1).unwrap();
    let mut func = Function::new(&g, NodeArray::from([x0, x1]), [f]).unwrap();

    let (out, grad, hessian) = func.evaluate_with_gradient_and_hessian(&mut g, &[1.5, -2.0]).unwrap();
    assert_relative_eq!(out[0], -4.5);
    assert_relative_eq!(grad[0], -6.0);
    assert_relative_eq!(grad[1], 2.25);
    let expected = [-4.0, 3.0, 3.0, 0.0];
    for (h, e) in hessian.iter().zip(expected) {
        assert_relative_eq!(*h, e, epsilon = 1e-12);
    }

    let hv = func
        .hessian_vector_product(&mut g, &[1.5, -2.0], &[1.0, 2.0])
        .unwrap();
    assert_relative_eq!(hv[0], -4.0 + 6.0, epsilon = 1e-12);
    assert_relative_eq!(hv[1], 3.0, epsilon = 1e-12);
}

#[test]
fn test_diag_hessian_on_elementwise_chain() {
    // f = sum(exp(x)): d²f/dx_i² = exp(x_i)
    let mut g = Graph::new();
    let x = g.source(1, 3, vec![0.0, 1.0, -1.0]).unwrap();
    let e = g.exp(x).unwrap();
    let f = g.sum(e).unwrap();
    let func = Function::new(&g, [x], [f]).unwrap();
    let diag = func.diag_hessian(&mut g, &[0.0, 1.0, -1.0]).unwrap();
    for (d, v) in diag.iter().zip([0.0_f64, 1.0, -1.0]) {
        assert_relative_eq!(*d, v.exp(), epsilon = 1e-12);
    }
}

#[test]
fn test_instantiate_shares_parameters() {
    let mut g = Graph::new();
    let (x, w, _b, out) = layer(&mut g);
    let func = Function::new(&g, [x], [out]).unwrap();
    let reference = func.evaluate(&mut g, &[1.0, 1.0, 1.0]).unwrap();

    let x1 = g.source(1, 3, vec![1.0, 1.0, 1.0]).unwrap();
    let x2 = g.source(1, 3, vec![0.0, 0.0, 0.0]).unwrap();
    let o1 = func.instantiate(&mut g, &NodeArray::from([x1])).unwrap();
    let o2 = func.instantiate(&mut g, &NodeArray::from([x2])).unwrap();
    let (o1, o2) = (o1.as_slice()[0], o2.as_slice()[0]);
    assert_ne!(o1, out);
    assert_ne!(o1, o2);
    assert_relative_eq!(g[o1].scalar().unwrap(), reference[0], epsilon = 1e-12);
    assert_relative_eq!(g[o2].scalar().unwrap(), 0.3, epsilon = 1e-12);

    // Both instances train the same w.
    let f1 = Function::new(&g, [x1], [o1]).unwrap();
    let f2 = Function::new(&g, [x2], [o2]).unwrap();
    assert_eq!(f1.parameters(), f2.parameters());
    assert!(f1.parameters().contains(w));

    let bad = g.source_zeros(3, 1);
    assert!(matches!(
        func.instantiate(&mut g, &NodeArray::from([bad])),
        Err(DagError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_verify_gradient_and_hessian() {
    let mut g = Graph::new();
    let (x, _, _, out) = layer(&mut g);
    let config = GradCheckConfig::default();
    let mut func = Function::new(&g, [x], [out]).unwrap();
    let input = [0.2, -0.4, 0.9];

    let grad_check = func.verify_gradient(&mut g, &input, config.step).unwrap();
    assert!(grad_check.passed(config.tolerance), "{:?}", grad_check);
    let hess_check = func.verify_hessian(&mut g, &input, 1e-5).unwrap();
    assert_eq!(hess_check.analytic.len(), 9);
    assert!(hess_check.passed(config.tolerance), "{:?}", hess_check);
    assert_eq!(g[x].value_vec(), input.to_vec(), "inputs are restored");
}
