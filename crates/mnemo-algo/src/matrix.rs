//! Dense kernels for the bandit covariance. Matrices are flat row-major
//! `Vec<f64>` so snapshots stay serializable across dimension changes.

use crate::types::{EPSILON, MIN_LAMBDA, MIN_RANK1_DIAG};

/// Cholesky factorization A = L * L^T for a symmetric matrix given row-major.
/// A small ridge is folded into the diagonal so mildly indefinite inputs
/// still produce a usable lower factor.
pub fn cholesky_decompose(a: &[f64], d: usize, lambda: f64) -> Vec<f64> {
    let safe_lambda = lambda.max(MIN_LAMBDA);
    let mut l = vec![0.0; d * d];

    let mut work = a.to_vec();
    for i in 0..d {
        work[i * d + i] += safe_lambda * EPSILON;
    }

    for i in 0..d {
        for j in 0..=i {
            let mut sum = work[i * d + j];
            for k in 0..j {
                sum -= l[i * d + k] * l[j * d + k];
            }

            if i == j {
                if sum <= 0.0 {
                    // Lost positive-definiteness on this pivot; pin it to the
                    // ridge instead of emitting NaN.
                    l[i * d + i] = safe_lambda.sqrt();
                } else {
                    l[i * d + i] = sum.sqrt();
                }
            } else {
                let diag = l[j * d + j];
                if diag.abs() > EPSILON {
                    l[i * d + j] = sum / diag;
                } else {
                    l[i * d + j] = 0.0;
                }
            }
        }
    }

    l
}

/// In-place rank-1 update of a lower Cholesky factor via Givens rotations:
/// afterwards L_new * L_new^T = L * L^T + x * x^T.
///
/// Returns false when any rotation would push a diagonal below `min_diag`,
/// in which case the caller must refactor from the full covariance.
pub fn cholesky_rank1_update(l: &mut [f64], x: &[f64], d: usize, min_diag: f64) -> bool {
    let safe_min_diag = min_diag.max(MIN_RANK1_DIAG);
    let mut carry = x.to_vec();

    for k in 0..d {
        let l_kk = l[k * d + k];
        let c_k = carry[k];

        let r = (l_kk * l_kk + c_k * c_k).sqrt();
        if r < safe_min_diag {
            return false;
        }

        let cos = l_kk / r;
        let sin = c_k / r;

        l[k * d + k] = r;

        for i in (k + 1)..d {
            let l_ik = l[i * d + k];
            let c_i = carry[i];
            l[i * d + k] = cos * l_ik + sin * c_i;
            carry[i] = -sin * l_ik + cos * c_i;
        }
    }

    for i in 0..d {
        let diag = l[i * d + i];
        if diag < safe_min_diag || diag.is_nan() {
            return false;
        }
    }

    true
}

/// Solve A * x = b through the factor: L * y = b, then L^T * x = y.
pub fn solve_cholesky(l: &[f64], b: &[f64], d: usize) -> Vec<f64> {
    let y = solve_triangular_lower(l, b, d);
    solve_triangular_upper_transpose(l, &y, d)
}

/// Forward substitution for L * x = b.
pub fn solve_triangular_lower(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut x = vec![0.0; n];

    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * x[j];
        }

        let diag = l[i * n + i];
        x[i] = if diag.abs() > EPSILON { sum / diag } else { 0.0 };
    }

    x
}

/// Back substitution for L^T * x = b, reading L^T[i][j] as L[j][i].
fn solve_triangular_upper_transpose(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut x = vec![0.0; n];

    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }

        let diag = l[i * n + i];
        x[i] = if diag.abs() > EPSILON { sum / diag } else { 0.0 };
    }

    x
}

/// Confidence quadratic x^T A^{-1} x computed as ||L^{-1} x||^2.
pub fn quadratic_form(l: &[f64], x: &[f64], d: usize) -> f64 {
    let z = solve_triangular_lower(l, x, d);
    z.iter().map(|&v| v * v).sum()
}

pub fn mat_vec_mul(a: &[f64], x: &[f64], d: usize) -> Vec<f64> {
    let mut out = vec![0.0; d];
    for i in 0..d {
        for j in 0..d {
            out[i] += a[i * d + j] * x[j];
        }
    }
    out
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum()
}

/// Outer-product accumulation A += x * x^T.
pub fn rank1_accumulate(a: &mut [f64], x: &[f64], d: usize) {
    for i in 0..d {
        for j in 0..d {
            a[i * d + j] += x[i] * x[j];
        }
    }
}

/// a += scale * b, elementwise.
pub fn axpy(a: &mut [f64], b: &[f64], scale: f64) {
    for (ai, &bi) in a.iter_mut().zip(b.iter()) {
        *ai += scale * bi;
    }
}

/// Embed a d_old x d_old matrix into the top-left block of a d_new x d_new
/// zero matrix. Newly exposed diagonal entries get `diag_fill` so a grown
/// covariance stays positive-definite before refactorization.
pub fn expand_padded(a: &[f64], d_old: usize, d_new: usize, diag_fill: f64) -> Vec<f64> {
    debug_assert!(d_new >= d_old);
    let mut out = vec![0.0; d_new * d_new];

    for i in 0..d_old {
        for j in 0..d_old {
            out[i * d_new + j] = a[i * d_old + j];
        }
    }
    for i in d_old..d_new {
        out[i * d_new + i] = diag_fill;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MIN_RANK1_DIAG;

    #[test]
    fn decompose_identity_gives_identity_factor() {
        let d = 3;
        let a = vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

        let l = cholesky_decompose(&a, d, 1.0);

        for i in 0..d {
            assert!((l[i * d + i] - 1.0).abs() < 0.01);
        }
    }

    #[test]
    fn solve_reproduces_rhs() {
        let d = 2;
        let a = vec![2.0, 1.0, 1.0, 2.0];
        let b = vec![1.0, 2.0];

        let l = cholesky_decompose(&a, d, 0.0);
        let x = solve_cholesky(&l, &b, d);

        let ax = mat_vec_mul(&a, &x, d);
        for i in 0..d {
            assert!((ax[i] - b[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn rank1_update_matches_direct_factorization() {
        let d = 3;
        let mut a = vec![0.0; d * d];
        for i in 0..d {
            a[i * d + i] = 2.0;
        }
        a[1] = 0.5;
        a[d] = 0.5;

        let x = vec![0.3, -0.7, 0.4];

        let mut l = cholesky_decompose(&a, d, 0.0);
        assert!(cholesky_rank1_update(&mut l, &x, d, MIN_RANK1_DIAG));

        rank1_accumulate(&mut a, &x, d);
        let l_direct = cholesky_decompose(&a, d, 0.0);

        for i in 0..d * d {
            assert!(
                (l[i] - l_direct[i]).abs() < 1e-9,
                "factor mismatch at {}: {} vs {}",
                i,
                l[i],
                l_direct[i]
            );
        }
    }

    #[test]
    fn rank1_update_refuses_degenerate_factor() {
        let d = 2;
        let mut l = vec![0.0, 0.0, 0.0, 0.0];
        let x = vec![0.0, 0.0];

        assert!(!cholesky_rank1_update(&mut l, &x, d, MIN_RANK1_DIAG));
    }

    #[test]
    fn quadratic_form_under_identity_is_squared_norm() {
        let d = 2;
        let l = vec![1.0, 0.0, 0.0, 1.0];
        let x = vec![3.0, 4.0];

        assert!((quadratic_form(&l, &x, d) - 25.0).abs() < 1e-10);
    }

    #[test]
    fn dot_and_mat_vec() {
        assert!((dot(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]) - 32.0).abs() < 1e-10);

        let a = vec![1.0, 2.0, 3.0, 4.0];
        let r = mat_vec_mul(&a, &[1.0, 2.0], 2);
        assert!((r[0] - 5.0).abs() < 1e-10);
        assert!((r[1] - 11.0).abs() < 1e-10);
    }

    #[test]
    fn expand_preserves_top_left_block() {
        let d_old = 2;
        let d_new = 4;
        let a = vec![2.0, 0.5, 0.5, 3.0];

        let grown = expand_padded(&a, d_old, d_new, 1.0);

        assert_eq!(grown.len(), d_new * d_new);
        assert_eq!(grown[0], 2.0);
        assert_eq!(grown[1], 0.5);
        assert_eq!(grown[d_new], 0.5);
        assert_eq!(grown[d_new + 1], 3.0);
        for i in d_old..d_new {
            assert_eq!(grown[i * d_new + i], 1.0);
            for j in 0..d_old {
                assert_eq!(grown[i * d_new + j], 0.0);
                assert_eq!(grown[j * d_new + i], 0.0);
            }
        }
    }
}
