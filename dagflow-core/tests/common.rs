use dagflow_core::{Graph, NodeId};

/// Installs a test logger once; honors `RUST_LOG`.
#[allow(dead_code)]
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A deterministic, well-conditioned `rows x cols` trainable leaf.
#[allow(dead_code)]
pub fn create_test_source(graph: &mut Graph, rows: usize, cols: usize, seed: f64) -> NodeId {
    let data = (0..rows * cols)
        .map(|i| ((i as f64 + 1.0) * seed).sin() * 0.8)
        .collect();
    graph.source(rows, cols, data).expect("Test source creation failed")
}
