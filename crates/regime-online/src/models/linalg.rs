// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

/// Solves `(XᵀX + ridge·I) w = Xᵀy` for row-major `rows`.
///
/// The intercept column, when present, is expected to be part of each row.
/// Returns `None` when the system is singular even after regularization.
pub(crate) fn ridge_least_squares(rows: &[Vec<f64>], targets: &[f64], ridge: f64) -> Option<Vec<f64>> {
    let dim = rows.first()?.len();
    if dim == 0 || rows.len() != targets.len() {
        return None;
    }

    let mut gram = vec![vec![0.0; dim]; dim];
    let mut rhs = vec![0.0; dim];
    for (row, target) in rows.iter().zip(targets) {
        for i in 0..dim {
            rhs[i] += row[i] * target;
            for j in i..dim {
                gram[i][j] += row[i] * row[j];
            }
        }
    }
    for i in 0..dim {
        for j in 0..i {
            gram[i][j] = gram[j][i];
        }
        gram[i][i] += ridge;
    }

    solve_in_place(gram, rhs)
}

/// Gaussian elimination with partial pivoting.
fn solve_in_place(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}
