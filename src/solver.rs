//! Dense matrix primitives and the ridge-regularized normal-equations fit.
//! Pure functions, no I/O; deterministic given identical input order.

use crate::config::{PIVOT_EPS, RIDGE_LAMBDA};

/// Fit `weights = (XᵗX + λI)⁻¹ Xᵗ y` with λ = 1e-3.
///
/// `x` is n×p with the first column all ones (intercept); `y` has length n.
/// Returns None when the regularized matrix is still numerically singular —
/// callers must treat that as insufficient/degenerate data, not retry.
pub fn ridge_solve(x: &[Vec<f64>], y: &[f64]) -> Option<Vec<f64>> {
    ridge_solve_with_lambda(x, y, RIDGE_LAMBDA)
}

pub fn ridge_solve_with_lambda(x: &[Vec<f64>], y: &[f64], lambda: f64) -> Option<Vec<f64>> {
    if x.is_empty() || x.len() != y.len() {
        return None;
    }
    let p = x[0].len();
    if p == 0 || x.iter().any(|row| row.len() != p) {
        return None;
    }

    let xt = transpose(x);
    let mut xtx = matmul(&xt, x);
    for (i, row) in xtx.iter_mut().enumerate() {
        row[i] += lambda;
    }

    let inv = invert(xtx)?;
    let xty = mat_vec(&xt, y);
    Some(mat_vec(&inv, &xty))
}

pub fn transpose(m: &[Vec<f64>]) -> Vec<Vec<f64>> {
    if m.is_empty() {
        return Vec::new();
    }
    let rows = m.len();
    let cols = m[0].len();
    let mut out = vec![vec![0.0; rows]; cols];
    for (i, row) in m.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            out[j][i] = v;
        }
    }
    out
}

pub fn matmul(a: &[Vec<f64>], b: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = a.len();
    let k = b.len();
    let m = if k > 0 { b[0].len() } else { 0 };
    let mut out = vec![vec![0.0; m]; n];
    for (i, a_row) in a.iter().enumerate() {
        for (l, b_row) in b.iter().enumerate() {
            let a_il = a_row[l];
            if a_il == 0.0 {
                continue;
            }
            for (j, &b_lj) in b_row.iter().enumerate() {
                out[i][j] += a_il * b_lj;
            }
        }
    }
    out
}

pub fn mat_vec(m: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    m.iter()
        .map(|row| row.iter().zip(v).map(|(a, b)| a * b).sum())
        .collect()
}

/// Gauss-Jordan inversion with partial pivoting: each step swaps the row
/// with the largest absolute pivot-column value into the pivot position.
/// Returns None when the best available pivot falls below PIVOT_EPS.
pub fn invert(mut m: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let n = m.len();
    let mut inv = vec![vec![0.0; n]; n];
    for (i, row) in inv.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_abs = m[col][col].abs();
        for r in (col + 1)..n {
            let a = m[r][col].abs();
            if a > pivot_abs {
                pivot_abs = a;
                pivot_row = r;
            }
        }
        if pivot_abs < PIVOT_EPS {
            return None;
        }
        m.swap(col, pivot_row);
        inv.swap(col, pivot_row);

        let pivot = m[col][col];
        for j in 0..n {
            m[col][j] /= pivot;
            inv[col][j] /= pivot;
        }

        for r in 0..n {
            if r == col {
                continue;
            }
            let factor = m[r][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                m[r][j] -= factor * m[col][j];
                inv[r][j] -= factor * inv[col][j];
            }
        }
    }

    Some(inv)
}
