// Dense row-major kernels shared by the propagation rules.
//
// Shapes are validated when nodes are built, so the kernels trust their
// arguments.

pub(crate) fn map(a: &[f64], f: impl Fn(f64) -> f64) -> Vec<f64> {
    a.iter().map(|&x| f(x)).collect()
}

pub(crate) fn zip_map(a: &[f64], b: &[f64], f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect()
}

pub(crate) fn zip3_map(
    a: &[f64],
    b: &[f64],
    c: &[f64],
    f: impl Fn(f64, f64, f64) -> f64,
) -> Vec<f64> {
    a.iter()
        .zip(b)
        .zip(c)
        .map(|((&x, &y), &z)| f(x, y, z))
        .collect()
}

pub(crate) fn sum(a: &[f64]) -> f64 {
    a.iter().sum()
}

/// `(m x k) · (k x n)`.
pub(crate) fn matmul_kernel(a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Vec<f64> {
    let mut out = vec![0.0; m * n];
    for i in 0..m {
        for p in 0..k {
            let a_ip = a[i * k + p];
            if a_ip == 0.0 {
                continue;
            }
            let row_b = &b[p * n..(p + 1) * n];
            let row_out = &mut out[i * n..(i + 1) * n];
            for (o, &b_pj) in row_out.iter_mut().zip(row_b) {
                *o += a_ip * b_pj;
            }
        }
    }
    out
}

/// Transpose of an `rows x cols` matrix.
pub(crate) fn transpose_kernel(a: &[f64], rows: usize, cols: usize) -> Vec<f64> {
    let mut out = vec![0.0; rows * cols];
    for i in 0..rows {
        for j in 0..cols {
            out[j * rows + i] = a[i * cols + j];
        }
    }
    out
}

/// Copies the listed rows of a `* x cols` matrix, in list order.
pub(crate) fn gather_rows(table: &[f64], cols: usize, rows: &[usize]) -> Vec<f64> {
    let mut out = Vec::with_capacity(rows.len() * cols);
    for &r in rows {
        out.extend_from_slice(&table[r * cols..(r + 1) * cols]);
    }
    out
}
