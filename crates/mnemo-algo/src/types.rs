use serde::{Deserialize, Serialize};

/// Feature dimension of the current context encoding (schema v2).
pub const FEATURE_DIMENSION: usize = 22;
/// Smallest regularization strength accepted for the covariance ridge.
pub const MIN_LAMBDA: f64 = 1e-3;
/// Smallest diagonal a rank-1 factor update may produce before we refuse it.
pub const MIN_RANK1_DIAG: f64 = 1e-6;
/// Absolute cap on covariance entries before sanitization clips them.
pub const MAX_COVARIANCE: f64 = 1e9;
/// Absolute cap on individual feature values.
pub const MAX_FEATURE_ABS: f64 = 50.0;
pub const EPSILON: f64 = 1e-10;

/// Persisted form of a LinUCB model. Matrices are row-major flat vectors so
/// the blob survives dimension migrations without a fixed-size type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditSnapshot {
    /// Covariance A = X^T X + lambda*I, d*d row-major.
    pub a: Vec<f64>,
    /// Reward-weighted vector b = X^T y, length d.
    pub b: Vec<f64>,
    /// Cached lower-triangular Cholesky factor of A, d*d row-major.
    pub l: Vec<f64>,
    pub lambda: f64,
    pub alpha: f64,
    pub d: usize,
    pub update_count: u64,
}

impl BanditSnapshot {
    pub fn init(d: usize, lambda: f64, alpha: f64) -> Self {
        let lambda = lambda.max(MIN_LAMBDA);
        let sqrt_lambda = lambda.sqrt();

        let mut a = vec![0.0; d * d];
        let mut l = vec![0.0; d * d];
        for i in 0..d {
            a[i * d + i] = lambda;
            l[i * d + i] = sqrt_lambda;
        }

        BanditSnapshot {
            a,
            b: vec![0.0; d],
            l,
            lambda,
            alpha,
            d,
            update_count: 0,
        }
    }

    /// Shape consistency check used when deserializing untrusted blobs.
    pub fn is_well_formed(&self) -> bool {
        self.d > 0
            && self.a.len() == self.d * self.d
            && self.l.len() == self.d * self.d
            && self.b.len() == self.d
    }
}

impl Default for BanditSnapshot {
    fn default() -> Self {
        BanditSnapshot::init(FEATURE_DIMENSION, 1.0, 0.3)
    }
}

/// Per-candidate scoring breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UcbStats {
    pub exploitation: f64,
    pub confidence: f64,
    pub score: f64,
}

/// Outcome of a single candidate selection across the action list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionOutcome {
    pub selected_index: usize,
    pub exploitation: f64,
    pub exploration: f64,
    pub score: f64,
    pub all_scores: Vec<f64>,
}

/// What happened inside an update call. `Reset` means the factorization was
/// unrecoverable and the model went back to the regularized identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    Applied,
    Refactored,
    Reset,
}

/// Health report over the covariance and its cached factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDiagnostics {
    pub is_healthy: bool,
    pub has_nan: bool,
    pub has_inf: bool,
    pub condition_estimate: f64,
    pub min_diagonal: f64,
    pub max_diagonal: f64,
    pub message: String,
}
