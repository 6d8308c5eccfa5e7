use crate::error::DagError;
use crate::graph::Graph;
use crate::node::{NodeId, UpdateStatus};
use approx::assert_relative_eq;

/// Seeds `out` with ones and back-propagates through `order` (reverse topological).
fn backprop(g: &mut Graph, out: NodeId, order: &[NodeId]) {
    let ones = vec![1.0; g[out].len()];
    g[out].set_gradient(&ones).unwrap();
    for &id in order {
        g.bprop(id).unwrap();
    }
}

#[test]
fn test_bprop_elementwise_rules() {
    let mut g = Graph::new();
    let a = g.source(1, 2, vec![2.0, 0.5]).unwrap();
    let b = g.source(1, 2, vec![4.0, 2.0]).unwrap();
    let q = g.div(a, b).unwrap();
    let e = g.exp(q).unwrap();
    let s = g.sum(e).unwrap();
    backprop(&mut g, s, &[s, e, q]);

    // d/da exp(a/b) = exp(a/b) / b ; d/db = -exp(a/b) a / b²
    for i in 0..2 {
        let (av, bv) = (g[a].value()[i], g[b].value()[i]);
        let ev = (av / bv).exp();
        assert_relative_eq!(g[a].gradient()[i], ev / bv, epsilon = 1e-12);
        assert_relative_eq!(g[b].gradient()[i], -ev * av / (bv * bv), epsilon = 1e-12);
    }
}

#[test]
fn test_bprop_matmul() {
    let mut g = Graph::new();
    // A: 2x3, B: 3x1
    let a = g.source(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let b = g.source(3, 1, vec![1.0, -1.0, 2.0]).unwrap();
    let y = g.matmul(a, b).unwrap();
    let s = g.sum(y).unwrap();
    backprop(&mut g, s, &[s, y]);

    // dS/dA[i][j] = B[j] ; dS/dB[j] = Σ_i A[i][j]
    assert_eq!(g[a].gradient_vec(), vec![1.0, -1.0, 2.0, 1.0, -1.0, 2.0]);
    assert_eq!(g[b].gradient_vec(), vec![5.0, 7.0, 9.0]);
}

#[test]
fn test_bprop_accumulates_over_shared_parent() {
    let mut g = Graph::new();
    let x = g.scalar(3.0);
    let y = g.mul(x, x).unwrap();
    backprop(&mut g, y, &[y]);
    assert_eq!(g[x].gradient_vec(), vec![6.0]);

    // A second pass without clearing adds up.
    backprop(&mut g, y, &[y]);
    assert_eq!(g[x].gradient_vec(), vec![12.0]);
}

#[test]
fn test_row_select_marks_only_selected_rows() {
    let mut g = Graph::new();
    let table = g.source(5, 2, (0..10).map(|v| v as f64).collect()).unwrap();
    g[table].set_allows_partial_update(true);
    let picked = g.row_select(table, vec![3, 1, 3]).unwrap();
    assert_eq!(g[picked].value_vec(), vec![6.0, 7.0, 2.0, 3.0, 6.0, 7.0]);

    let s = g.sum(picked).unwrap();
    backprop(&mut g, s, &[s, picked]);

    assert_eq!(g[table].update_status(), UpdateStatus::SomeRows);
    let mut dirty = g[table].dirty_rows().to_vec();
    dirty.sort_unstable();
    assert_eq!(dirty, vec![1, 3]);
    assert_eq!(
        g[table].gradient_vec(),
        vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 2.0, 2.0, 0.0, 0.0]
    );
}

#[test]
fn test_bbprop_matches_second_derivative_of_scalar_chain() {
    // y = exp(x²): dy/dx = 2x e^{x²}, d²y/dx² = (2 + 4x²) e^{x²}
    let mut g = Graph::new();
    let x = g.scalar(0.7);
    let sq = g.square(x).unwrap();
    let y = g.exp(sq).unwrap();
    backprop(&mut g, y, &[y, sq]);
    g.bbprop(y).unwrap();
    g.bbprop(sq).unwrap();

    let xv = 0.7_f64;
    let expected = (2.0 + 4.0 * xv * xv) * (xv * xv).exp();
    assert_relative_eq!(g[x].diag_hessian().unwrap()[0], expected, epsilon = 1e-12);
}

#[test]
fn test_bbprop_on_leaf_is_noop() {
    let mut g = Graph::new();
    let x = g.scalar(1.0);
    g.bbprop(x).unwrap();
    assert!(g[x].diag_hessian().is_none());
}

#[test]
fn test_rfprop_directional_derivative() {
    // y = tanh(a * b), R{y} = (1 - y²)(ra b + a rb)
    let mut g = Graph::new();
    let a = g.source(1, 2, vec![0.3, -0.2]).unwrap();
    let b = g.source(1, 2, vec![1.5, 0.5]).unwrap();
    let p = g.mul(a, b).unwrap();
    let y = g.tanh(p).unwrap();

    g[a].set_r_value(&[1.0, 0.0]).unwrap();
    g[b].set_r_value(&[0.0, 2.0]).unwrap();
    g.rfprop(p).unwrap();
    g.rfprop(y).unwrap();

    let r = g[y].r_value().unwrap().to_vec();
    let y0 = (0.3_f64 * 1.5).tanh();
    let y1 = (-0.2_f64 * 0.5).tanh();
    assert_relative_eq!(r[0], (1.0 - y0 * y0) * 1.5, epsilon = 1e-12);
    assert_relative_eq!(r[1], (1.0 - y1 * y1) * (-0.2 * 2.0), epsilon = 1e-12);
}

#[test]
fn test_rfprop_missing_parent_sensitivity_counts_as_zero() {
    let mut g = Graph::new();
    let a = g.scalar(2.0);
    let b = g.scalar(5.0);
    let y = g.mul(a, b).unwrap();
    g[a].set_r_value(&[1.0]).unwrap();
    g.rfprop(y).unwrap();
    assert_eq!(g[y].r_value(), Some(&[5.0][..]));
}

#[test]
fn test_symbolic_bprop_row_select_is_unsupported() {
    let mut g = Graph::new();
    let table = g.source_zeros(3, 1);
    let picked = g.row_select(table, vec![0]).unwrap();
    let one = g.constant_scalar(1.0);
    g[picked].g = Some(one);
    assert_eq!(
        g.symbolic_bprop(picked),
        Err(DagError::Unsupported {
            kind: "row_select",
            operation: "symbolic_bprop",
        })
    );
}

#[test]
fn test_symbolic_bprop_builds_gradient_nodes() {
    // y = x * w, dy/dx = w built as a node
    let mut g = Graph::new();
    let x = g.scalar(3.0);
    let w = g.scalar(-2.0);
    let y = g.mul(x, w).unwrap();
    let seed = g.constant_scalar(1.0);
    g[y].g = Some(seed);
    g.symbolic_bprop(y).unwrap();

    let gx = g[x].symbolic_gradient().unwrap();
    let gw = g[w].symbolic_gradient().unwrap();
    assert_eq!(g[gx].scalar(), Ok(-2.0));
    assert_eq!(g[gw].scalar(), Ok(3.0));
}
