//! Linear-phase FIR design for the TSP GFIR filters. Frequencies are
//! normalized to the sample rate (0..0.5).

use std::f64::consts::PI;

use crate::error::{LimeError, Result};

const GRID_DENSITY: usize = 16;

/// Low-pass taps: passband below `w1` (or `w2`), stopband gain `g_stop`.
pub fn generate_lpf_coef(n: usize, w1: f64, w2: f64, g_stop: f64) -> Result<Vec<f64>> {
    for v in [w1, w2, g_stop] {
        if !(0.0..=0.5).contains(&v) {
            return Err(LimeError::invalid(
                "Normalized frequencies and stopband gain must be within [0, 0.5].",
            ));
        }
    }
    let (a1, a2) = if w1 < w2 { (1.0, g_stop) } else { (g_stop, 1.0) };
    generate_filter(n, w1, w2, a1, a2)
}

/// Least-squares design: gain `a1` below `w1`, `a2` above `w2`, with the
/// band between them left unconstrained.
pub fn generate_filter(n: usize, w1: f64, w2: f64, a1: f64, a2: f64) -> Result<Vec<f64>> {
    if n == 0 {
        return Err(LimeError::invalid("Filter length must be positive."));
    }
    let (lo, hi, g_lo, g_hi) = if w1 <= w2 {
        (w1, w2, a1, a2)
    } else {
        (w2, w1, a2, a1)
    };
    let m = (n + 1) / 2;
    let center = (n as f64 - 1.0) / 2.0;
    let basis = |k: usize, w: f64| -> f64 {
        if n % 2 == 1 && k == m - 1 {
            1.0
        } else {
            2.0 * (2.0 * PI * w * (k as f64 - center)).cos()
        }
    };

    let points = GRID_DENSITY * n;
    let grid = (0..=points)
        .map(|i| 0.5 * i as f64 / points as f64)
        .filter_map(|w| {
            if w <= lo {
                Some((w, g_lo))
            } else if w >= hi {
                Some((w, g_hi))
            } else {
                None
            }
        });

    let mut ata = vec![vec![0.0; m]; m];
    let mut atd = vec![0.0; m];
    for (w, desired) in grid {
        let row: Vec<f64> = (0..m).map(|k| basis(k, w)).collect();
        for i in 0..m {
            atd[i] += row[i] * desired;
            for j in 0..m {
                ata[i][j] += row[i] * row[j];
            }
        }
    }
    let half = solve(ata, atd)?;

    let mut taps = vec![0.0; n];
    for (k, c) in half.iter().enumerate() {
        taps[k] = *c;
        taps[n - 1 - k] = *c;
    }
    Ok(taps)
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|x, y| a[*x][col].abs().total_cmp(&a[*y][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            return Err(LimeError::invalid("Filter design is ill-conditioned."));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let sum: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - sum) / a[row][row];
    }
    Ok(x)
}
