use super::*;

/// Diamond: x feeds both a = x² and xw = x * w, which meet in d = a + xw; out = sum(d).
fn diamond(g: &mut Graph) -> (NodeId, NodeId, NodeId, NodeId, NodeId, NodeId) {
    let x = g.source(1, 2, vec![1.0, 2.0]).unwrap();
    let w = g.source(1, 2, vec![0.5, 0.5]).unwrap();
    let a = g.square(x).unwrap();
    let xw = g.mul(x, w).unwrap();
    let d = g.add(a, xw).unwrap();
    let out = g.sum(d).unwrap();
    (x, w, a, xw, d, out)
}

fn position(path: &NodeArray, id: NodeId) -> usize {
    path.iter().position(|&n| n == id).unwrap()
}

#[test]
fn test_diamond_path_is_minimal_and_ordered() {
    let mut g = Graph::new();
    let (x, w, a, xw, d, out) = diamond(&mut g);
    let builder = PathBuilder::new(&g);
    let path = builder.path(&NodeArray::from([x]), &NodeArray::from([out]));

    assert_eq!(path.len(), 4, "each node on the diamond exactly once");
    for id in [a, xw, d, out] {
        assert!(path.contains(id));
    }
    assert!(!path.contains(x), "inputs are excluded");
    assert!(!path.contains(w), "w does not depend on x");
    assert!(position(&path, a) < position(&path, d));
    assert!(position(&path, xw) < position(&path, d));
    assert!(position(&path, d) < position(&path, out));
}

#[test]
fn test_shared_inner_ancestor_appears_once_before_its_children() {
    // i -> s = exp(i) -> {square(s), tanh(s)} -> add
    let mut g = Graph::new();
    let i = g.scalar(0.3);
    let s = g.exp(i).unwrap();
    let a = g.square(s).unwrap();
    let b = g.tanh(s).unwrap();
    let d = g.add(a, b).unwrap();
    let path = PathBuilder::new(&g).path(&NodeArray::from([i]), &NodeArray::from([d]));

    assert_eq!(path.len(), 4);
    assert_eq!(path.iter().filter(|&&n| n == s).count(), 1);
    assert!(position(&path, s) < position(&path, a));
    assert!(position(&path, s) < position(&path, b));
    assert!(position(&path, a) < position(&path, d));
    assert!(position(&path, b) < position(&path, d));
}

#[test]
fn test_sources_from_stops_at_inputs() {
    let mut g = Graph::new();
    let (x, w, _a, xw, _d, out) = diamond(&mut g);
    let v = g.source(1, 2, vec![3.0, 3.0]).unwrap();
    let xwv = g.mul(xw, v).unwrap();
    let top = g.sum(xwv).unwrap();
    let outputs = NodeArray::from([out, top]);
    let builder = PathBuilder::new(&g);

    // xw as a boundary hides w, but x still reaches `out` through a = x².
    let sources = builder.sources_from(&NodeArray::from([xw]), &outputs);
    assert_eq!(sources.as_slice(), &[x, v]);
    assert!(!sources.contains(w));

    let all = builder.sources(&outputs);
    assert_eq!(all.as_slice(), &[x, w, v]);

    let inner = builder.ancestors_from(&NodeArray::from([xw]), &NodeArray::from([top]));
    assert_eq!(inner.as_slice(), &[v, xwv, top]);
}

#[test]
fn test_path_with_repeated_parent_and_repeated_output() {
    let mut g = Graph::new();
    let x = g.scalar(2.0);
    let sq = g.mul(x, x).unwrap();
    let y = g.add(sq, sq).unwrap();
    let path = PathBuilder::new(&g).path(&NodeArray::from([x]), &NodeArray::from([y, y]));
    assert_eq!(path.as_slice(), &[sq, y]);
}

#[test]
fn test_inputs_are_a_boundary() {
    // c -> h -> y, with h chosen as the input: c is never reached.
    let mut g = Graph::new();
    let c = g.scalar(1.0);
    let h = g.exp(c).unwrap();
    let y = g.tanh(h).unwrap();
    let builder = PathBuilder::new(&g);
    let path = builder.path(&NodeArray::from([h]), &NodeArray::from([y]));
    assert_eq!(path.as_slice(), &[y]);
}

#[test]
fn test_unreachable_outputs_give_empty_path() {
    let mut g = Graph::new();
    let x = g.scalar(1.0);
    let w = g.scalar(2.0);
    let y = g.square(w).unwrap();
    let builder = PathBuilder::new(&g);
    assert!(builder.path(&NodeArray::from([x]), &NodeArray::from([y])).is_empty());
    assert_eq!(
        builder
            .path(&NodeArray::from([x, w]), &NodeArray::from([y]))
            .as_slice(),
        &[y]
    );
}

#[test]
fn test_ancestors_sources_and_non_input_parents() {
    let mut g = Graph::new();
    let (x, w, a, _xw, _d, out) = diamond(&mut g);
    // Not an ancestor of `out`.
    let w2 = g.square(w).unwrap();
    let builder = PathBuilder::new(&g);

    let anc = builder.ancestors(&NodeArray::from([out]));
    assert_eq!(anc.len(), 6);
    assert!(position(&anc, x) < position(&anc, a));
    assert!(!anc.contains(w2));

    let sources = builder.sources(&NodeArray::from([out]));
    assert_eq!(sources.len(), 2);
    assert!(sources.contains(x) && sources.contains(w));

    let inputs = NodeArray::from([x]);
    let path = builder.path(&inputs, &NodeArray::from([out]));
    assert_eq!(builder.non_input_parents(&path, &inputs).as_slice(), &[w]);
    // w is a leaf: nothing to refresh.
    assert!(builder
        .parents_path(&inputs, &path, &NodeArray::from([out]))
        .is_empty());
}

#[test]
fn test_parents_path_refreshes_parameter_only_branches() {
    // y = x * exp(w): exp(w) is read by the path but does not depend on x.
    let mut g = Graph::new();
    let x = g.scalar(1.0);
    let w = g.scalar(0.0);
    let ew = g.exp(w).unwrap();
    let y = g.mul(x, ew).unwrap();
    // An output that does not depend on x at all.
    let ws = g.square(w).unwrap();
    let z = g.scale(ws, 2.0).unwrap();

    let builder = PathBuilder::new(&g);
    let inputs = NodeArray::from([x]);
    let outputs = NodeArray::from([y, z]);
    let path = builder.path(&inputs, &outputs);
    assert_eq!(path.as_slice(), &[y]);

    let refresh = builder.parents_path(&inputs, &path, &outputs);
    assert_eq!(refresh.as_slice(), &[ew, ws, z]);
}
