//! Dense linear solvers for transform fitting.
//!
//! The systems here are tiny (at most a few dozen unknowns), so plain
//! Gaussian elimination with partial pivoting is both sufficient and
//! deterministic.

/// Solve the square system `a · x = b` in place. `None` when the matrix is
/// singular to working precision.
pub fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = a.len();
    if n == 0 || b.len() != n || a.iter().any(|row| row.len() != n) {
        return None;
    }

    for col in 0..n {
        // Partial pivoting: largest magnitude in the remaining column.
        let mut pivot_row = col;
        let mut pivot_mag = a[col][col].abs();
        for row in (col + 1)..n {
            let mag = a[row][col].abs();
            if mag > pivot_mag {
                pivot_row = row;
                pivot_mag = mag;
            }
        }
        if !pivot_mag.is_finite() || pivot_mag < 1e-12 {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

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
        let mut sum = b[row];
        for col in (row + 1)..n {
            sum -= a[row][col] * x[col];
        }
        x[row] = sum / a[row][row];
    }
    if x.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(x)
}

/// Least-squares solution of the overdetermined system whose rows are
/// `rows[i] · x = rhs[i]`, via the normal equations.
pub fn solve_least_squares(rows: &[Vec<f64>], rhs: &[f64]) -> Option<Vec<f64>> {
    let m = rows.len();
    let n = rows.first()?.len();
    if rhs.len() != m || m < n {
        return None;
    }

    let mut ata = vec![vec![0.0; n]; n];
    let mut atb = vec![0.0; n];
    for (row, &b) in rows.iter().zip(rhs) {
        if row.len() != n {
            return None;
        }
        for i in 0..n {
            for j in 0..n {
                ata[i][j] += row[i] * row[j];
            }
            atb[i] += row[i] * b;
        }
    }

    solve_linear(ata, atb)
}
