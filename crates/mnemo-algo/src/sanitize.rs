//! Numeric guards applied before anything touches the covariance. Feature
//! vectors arrive from user-behavior pipelines and may carry NaN/Inf after
//! upstream division; everything here clips rather than errors.

use crate::types::{
    ModelDiagnostics, EPSILON, MAX_COVARIANCE, MAX_FEATURE_ABS, MIN_LAMBDA, MIN_RANK1_DIAG,
};

pub fn has_invalid_values(values: &[f64]) -> bool {
    values.iter().any(|&v| v.is_nan() || v.is_infinite())
}

/// NaN/Inf become 0, magnitudes clip to MAX_FEATURE_ABS.
pub fn sanitize_feature_vector(x: &mut [f64]) {
    for v in x.iter_mut() {
        if v.is_nan() || v.is_infinite() {
            *v = 0.0;
        } else if *v > MAX_FEATURE_ABS {
            *v = MAX_FEATURE_ABS;
        } else if *v < -MAX_FEATURE_ABS {
            *v = -MAX_FEATURE_ABS;
        }
    }
}

/// Restore the covariance to something factorizable: finite entries, bounded
/// magnitude, diagonal at least lambda, exact symmetry.
pub fn sanitize_covariance(a: &mut [f64], d: usize, lambda: f64) {
    let safe_lambda = lambda.max(MIN_LAMBDA);

    for i in 0..d {
        for j in 0..d {
            let idx = i * d + j;
            let v = a[idx];

            if v.is_nan() || v.is_infinite() {
                a[idx] = if i == j { safe_lambda } else { 0.0 };
                continue;
            }
            if v.abs() > MAX_COVARIANCE {
                a[idx] = v.signum() * MAX_COVARIANCE;
            }
        }

        let diag_idx = i * d + i;
        if a[diag_idx] < safe_lambda {
            a[diag_idx] = safe_lambda;
        }
    }

    for i in 0..d {
        for j in (i + 1)..d {
            let avg = (a[i * d + j] + a[j * d + i]) / 2.0;
            a[i * d + j] = avg;
            a[j * d + i] = avg;
        }
    }
}

/// Decide between the incremental rank-1 path and a full refactorization.
/// Trips on the periodic schedule, on a sick diagonal, or when the diagonal
/// ratio suggests the condition number has drifted past `condition_limit`.
pub fn needs_full_refactor(
    update_count: u64,
    l: &[f64],
    d: usize,
    refactor_every: u64,
    condition_limit: f64,
) -> bool {
    if refactor_every > 0 && update_count % refactor_every == 0 {
        return true;
    }

    for i in 0..d {
        let diag = l[i * d + i];
        if diag.is_nan() || diag.is_infinite() || diag < MIN_RANK1_DIAG {
            return true;
        }
    }

    let mut min_diag = f64::MAX;
    let mut max_diag = f64::MIN;
    for i in 0..d {
        let diag = l[i * d + i];
        if diag > 0.0 {
            min_diag = min_diag.min(diag);
            max_diag = max_diag.max(diag);
        }
    }

    if min_diag > 0.0 && max_diag / min_diag > condition_limit {
        return true;
    }

    false
}

pub fn diagnose(a: &[f64], l: &[f64], d: usize) -> ModelDiagnostics {
    let mut has_nan = false;
    let mut has_inf = false;
    let mut min_diagonal = f64::MAX;
    let mut max_diagonal = f64::MIN;

    for v in a.iter() {
        if v.is_nan() {
            has_nan = true;
        }
        if v.is_infinite() {
            has_inf = true;
        }
    }

    for i in 0..d {
        let diag = l[i * d + i];
        if diag.is_nan() {
            has_nan = true;
        }
        if diag.is_infinite() {
            has_inf = true;
        }
        if diag > 0.0 && diag.is_finite() {
            min_diagonal = min_diagonal.min(diag);
            max_diagonal = max_diagonal.max(diag);
        }
    }

    // Squaring the factor-diagonal ratio approximates cond(A) since
    // A = L * L^T.
    let condition_estimate = if min_diagonal > EPSILON {
        (max_diagonal / min_diagonal).powi(2)
    } else {
        f64::MAX
    };

    let is_healthy = !has_nan && !has_inf && condition_estimate < 1e12;

    let message = if is_healthy {
        "model is healthy".to_string()
    } else if has_nan {
        "model contains NaN values".to_string()
    } else if has_inf {
        "model contains infinite values".to_string()
    } else {
        format!("high condition estimate: {:.2e}", condition_estimate)
    };

    ModelDiagnostics {
        is_healthy,
        has_nan,
        has_inf,
        condition_estimate,
        min_diagonal: if min_diagonal == f64::MAX {
            0.0
        } else {
            min_diagonal
        },
        max_diagonal: if max_diagonal == f64::MIN {
            0.0
        } else {
            max_diagonal
        },
        message,
    }
}
