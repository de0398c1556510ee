//! Small dense linear algebra for per-arm ridge regression.
//!
//! Matrices are row-major `Vec<f64>` of length `dim * dim`. Dimensions are in
//! the tens, so plain loops are fine.

use tracing::warn;

/// Relative pivot threshold below which Cholesky reports "not positive-definite"
const PIVOT_EPS: f64 = 1e-12;

/// Eigenvalues below `max_eigen * PINV_RCOND` are treated as zero
const PINV_RCOND: f64 = 1e-12;

const JACOBI_MAX_SWEEPS: usize = 100;

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn mat_vec(a: &[f64], dim: usize, x: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; dim];
    for (i, slot) in out.iter_mut().enumerate() {
        let row = &a[i * dim..(i + 1) * dim];
        *slot = dot(row, x);
    }
    out
}

/// `value * I`
pub fn scaled_identity(dim: usize, value: f64) -> Vec<f64> {
    let mut m = vec![0.0; dim * dim];
    for i in 0..dim {
        m[i * dim + i] = value;
    }
    m
}

/// `a += x xᵀ`
pub fn add_outer(a: &mut [f64], dim: usize, x: &[f64]) {
    for i in 0..dim {
        if x[i] == 0.0 {
            continue;
        }
        for j in 0..dim {
            a[i * dim + j] += x[i] * x[j];
        }
    }
}

/// Cholesky factor `L` (lower triangular) of a symmetric positive-definite matrix
pub fn cholesky(a: &[f64], dim: usize) -> Option<Vec<f64>> {
    let scale = (0..dim)
        .map(|i| a[i * dim + i].abs())
        .fold(0.0_f64, f64::max)
        .max(f64::MIN_POSITIVE);
    let mut l = vec![0.0; dim * dim];
    for j in 0..dim {
        let mut diag = a[j * dim + j];
        for k in 0..j {
            diag -= l[j * dim + k] * l[j * dim + k];
        }
        if !diag.is_finite() || diag <= PIVOT_EPS * scale {
            return None;
        }
        let pivot = diag.sqrt();
        l[j * dim + j] = pivot;
        for i in (j + 1)..dim {
            let mut s = a[i * dim + j];
            for k in 0..j {
                s -= l[i * dim + k] * l[j * dim + k];
            }
            l[i * dim + j] = s / pivot;
        }
    }
    Some(l)
}

/// Inverse from a Cholesky factor by solving `L Lᵀ X = I` column by column
fn inverse_from_cholesky(l: &[f64], dim: usize) -> Vec<f64> {
    let mut inv = vec![0.0; dim * dim];
    let mut y = vec![0.0; dim];
    let mut col = vec![0.0; dim];
    for c in 0..dim {
        // forward: L y = e_c
        for i in 0..dim {
            let mut s = if i == c { 1.0 } else { 0.0 };
            for k in 0..i {
                s -= l[i * dim + k] * y[k];
            }
            y[i] = s / l[i * dim + i];
        }
        // backward: Lᵀ x = y
        for i in (0..dim).rev() {
            let mut s = y[i];
            for k in (i + 1)..dim {
                s -= l[k * dim + i] * col[k];
            }
            col[i] = s / l[i * dim + i];
        }
        for i in 0..dim {
            inv[i * dim + c] = col[i];
        }
    }
    inv
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Returns `(eigenvalues, eigenvectors)` with eigenvectors stored as columns.
pub fn symmetric_eigen(a: &[f64], dim: usize) -> (Vec<f64>, Vec<f64>) {
    let mut m = a.to_vec();
    let mut v = scaled_identity(dim, 1.0);

    for _ in 0..JACOBI_MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..dim {
            for q in (p + 1)..dim {
                off += m[p * dim + q] * m[p * dim + q];
            }
        }
        if off < 1e-24 {
            break;
        }

        for p in 0..dim {
            for q in (p + 1)..dim {
                let apq = m[p * dim + q];
                if apq.abs() < 1e-300 {
                    continue;
                }
                let theta = (m[q * dim + q] - m[p * dim + p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..dim {
                    let mkp = m[k * dim + p];
                    let mkq = m[k * dim + q];
                    m[k * dim + p] = c * mkp - s * mkq;
                    m[k * dim + q] = s * mkp + c * mkq;
                }
                for k in 0..dim {
                    let mpk = m[p * dim + k];
                    let mqk = m[q * dim + k];
                    m[p * dim + k] = c * mpk - s * mqk;
                    m[q * dim + k] = s * mpk + c * mqk;
                }
                for k in 0..dim {
                    let vkp = v[k * dim + p];
                    let vkq = v[k * dim + q];
                    v[k * dim + p] = c * vkp - s * vkq;
                    v[k * dim + q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let eigenvalues = (0..dim).map(|i| m[i * dim + i]).collect();
    (eigenvalues, v)
}

/// Moore-Penrose pseudo-inverse of a symmetric matrix
pub fn pseudo_inverse(a: &[f64], dim: usize) -> Vec<f64> {
    let (values, vectors) = symmetric_eigen(a, dim);
    let max_abs = values.iter().map(|v| v.abs()).fold(0.0_f64, f64::max);
    let cutoff = max_abs * PINV_RCOND * dim as f64;

    let mut pinv = vec![0.0; dim * dim];
    for (k, lambda) in values.iter().enumerate() {
        if !lambda.is_finite() || lambda.abs() <= cutoff || *lambda == 0.0 {
            continue;
        }
        let inv = 1.0 / lambda;
        for i in 0..dim {
            let vik = vectors[i * dim + k];
            if vik == 0.0 {
                continue;
            }
            for j in 0..dim {
                pinv[i * dim + j] += vik * vectors[j * dim + k] * inv;
            }
        }
    }
    pinv
}

/// Invert a symmetric matrix, falling back to the pseudo-inverse when it is
/// singular or not positive-definite.
///
/// Returns the inverse and whether the fallback was used.
pub fn invert_or_pinv(a: &[f64], dim: usize) -> (Vec<f64>, bool) {
    if a.iter().all(|v| v.is_finite()) {
        if let Some(l) = cholesky(a, dim) {
            return (inverse_from_cholesky(&l, dim), false);
        }
    }
    warn!(dim, "Design matrix is singular, using pseudo-inverse");
    let sanitized: Vec<f64> = a
        .iter()
        .map(|v| if v.is_finite() { *v } else { 0.0 })
        .collect();
    (pseudo_inverse(&sanitized, dim), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f64], b: &[f64], tol: f64) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < tol, "{} vs {}", x, y);
        }
    }

    fn mat_mul(a: &[f64], b: &[f64], dim: usize) -> Vec<f64> {
        let mut out = vec![0.0; dim * dim];
        for i in 0..dim {
            for j in 0..dim {
                for k in 0..dim {
                    out[i * dim + j] += a[i * dim + k] * b[k * dim + j];
                }
            }
        }
        out
    }

    #[test]
    fn test_cholesky_inverse() {
        let a = vec![4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0];
        let (inv, fallback) = invert_or_pinv(&a, 3);
        assert!(!fallback);
        assert_close(&mat_mul(&a, &inv, 3), &scaled_identity(3, 1.0), 1e-12);
    }

    #[test]
    fn test_singular_falls_back_to_pinv() {
        // rank-1 matrix x xᵀ with x = [1, 2]
        let a = vec![1.0, 2.0, 2.0, 4.0];
        let (pinv, fallback) = invert_or_pinv(&a, 2);
        assert!(fallback);
        // A A⁺ A = A
        let apa = mat_mul(&mat_mul(&a, &pinv, 2), &a, 2);
        assert_close(&apa, &a, 1e-9);
    }

    #[test]
    fn test_zero_matrix_pinv_is_zero() {
        let (pinv, fallback) = invert_or_pinv(&[0.0; 4], 2);
        assert!(fallback);
        assert!(pinv.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_symmetric_eigen_diagonalizes() {
        let a = vec![2.0, 1.0, 1.0, 2.0];
        let (mut values, _) = symmetric_eigen(&a, 2);
        values.sort_by(|x, y| x.partial_cmp(y).unwrap());
        assert_close(&values, &[1.0, 3.0], 1e-12);
    }
}
