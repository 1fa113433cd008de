//! Linear UCB contextual bandit with a cached Cholesky factor.
//!
//! The model never inverts A. `theta = A^{-1} b` comes from forward/back
//! substitution against the cached lower factor, and the confidence term
//! `x^T A^{-1} x` is the squared norm of one triangular solve. Updates go
//! through an incremental rank-1 factor update and fall back to a full
//! refactorization (and, as a last resort, a regularized identity reset)
//! when the numerics degrade.

use rayon::prelude::*;

use crate::matrix::{
    axpy, cholesky_decompose, cholesky_rank1_update, dot, expand_padded, quadratic_form,
    rank1_accumulate, solve_cholesky,
};
use crate::sanitize::{
    diagnose, needs_full_refactor, sanitize_covariance, sanitize_feature_vector,
};
use crate::types::{
    BanditSnapshot, ModelDiagnostics, SelectionOutcome, UcbStats, UpdateOutcome, MIN_RANK1_DIAG,
};

/// Tunables governing when the incremental factor path gives way to a full
/// refactorization. Deliberately explicit rather than buried constants.
#[derive(Debug, Clone, Copy)]
pub struct RefactorPolicy {
    /// Full refactorization every this many updates (0 disables the schedule).
    pub refactor_every: u64,
    /// Factor-diagonal ratio above which the factor is considered drifted.
    pub condition_limit: f64,
}

impl Default for RefactorPolicy {
    fn default() -> Self {
        RefactorPolicy {
            refactor_every: 100,
            condition_limit: 1e8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinUcbModel {
    state: BanditSnapshot,
    policy: RefactorPolicy,
}

impl LinUcbModel {
    pub fn new(d: usize, lambda: f64, alpha: f64) -> Self {
        LinUcbModel {
            state: BanditSnapshot::init(d, lambda, alpha),
            policy: RefactorPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RefactorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Restore a persisted model, migrating its dimension when the stored
    /// blob disagrees with the configured dimension. Growing zero-pads the
    /// covariance top-left block and refactors; shrinking would silently
    /// truncate learned structure, so it resets to a fresh model instead.
    pub fn from_snapshot(snapshot: BanditSnapshot, d: usize, policy: RefactorPolicy) -> Self {
        if !snapshot.is_well_formed() {
            return LinUcbModel::new(d, snapshot.lambda, snapshot.alpha).with_policy(policy);
        }

        let state = if snapshot.d == d {
            snapshot
        } else if snapshot.d < d {
            let d_old = snapshot.d;
            let a = expand_padded(&snapshot.a, d_old, d, snapshot.lambda);
            let mut b = snapshot.b;
            b.resize(d, 0.0);
            let l = cholesky_decompose(&a, d, snapshot.lambda);
            BanditSnapshot {
                a,
                b,
                l,
                lambda: snapshot.lambda,
                alpha: snapshot.alpha,
                d,
                update_count: snapshot.update_count,
            }
        } else {
            BanditSnapshot::init(d, snapshot.lambda, snapshot.alpha)
        };

        LinUcbModel { state, policy }
    }

    pub fn snapshot(&self) -> BanditSnapshot {
        self.state.clone()
    }

    pub fn d(&self) -> usize {
        self.state.d
    }

    pub fn alpha(&self) -> f64 {
        self.state.alpha
    }

    pub fn update_count(&self) -> u64 {
        self.state.update_count
    }

    /// Coefficient estimate solved through the cached factor.
    pub fn theta(&self) -> Vec<f64> {
        solve_cholesky(&self.state.l, &self.state.b, self.state.d)
    }

    /// Exploitation, confidence and combined score for one context vector.
    /// Alpha arrives per call so the cold-start controller stays in charge
    /// of the exploration budget.
    pub fn ucb_stats(&self, x: &[f64], alpha: f64) -> UcbStats {
        let d = self.state.d;
        let theta = solve_cholesky(&self.state.l, &self.state.b, d);
        let exploitation = dot(&theta, x);
        let confidence = quadratic_form(&self.state.l, x, d).sqrt();

        UcbStats {
            exploitation,
            confidence,
            score: exploitation + alpha * confidence,
        }
    }

    /// Argmax over candidate context vectors. Ties resolve to the lowest
    /// index so a fixed candidate enumeration yields deterministic picks.
    /// Returns None for an empty candidate list or any dimension mismatch.
    pub fn select(&self, candidates: &[Vec<f64>], alpha: f64) -> Option<SelectionOutcome> {
        if candidates.is_empty() {
            return None;
        }
        let d = self.state.d;
        if candidates.iter().any(|x| x.len() != d) {
            return None;
        }

        let stats: Vec<UcbStats> = candidates
            .par_iter()
            .map(|x| {
                let mut clean = x.clone();
                sanitize_feature_vector(&mut clean);
                self.ucb_stats(&clean, alpha)
            })
            .collect();

        let mut best_idx = 0;
        for (idx, s) in stats.iter().enumerate() {
            if s.score > stats[best_idx].score {
                best_idx = idx;
            }
        }

        let best = &stats[best_idx];
        Some(SelectionOutcome {
            selected_index: best_idx,
            exploitation: best.exploitation,
            exploration: best.confidence,
            score: best.score,
            all_scores: stats.iter().map(|s| s.score).collect(),
        })
    }

    /// A += x x^T, b += reward * x, then maintain the factor. The factor is
    /// updated incrementally unless the refactor policy trips or the rank-1
    /// pass reports instability; if even a full refactorization comes back
    /// unusable the model resets to the regularized identity.
    pub fn update(&mut self, x: &[f64], reward: f64) -> UpdateOutcome {
        let d = self.state.d;
        if x.len() != d {
            return UpdateOutcome::Applied;
        }

        let mut x = x.to_vec();
        sanitize_feature_vector(&mut x);

        let scheduled_refactor = needs_full_refactor(
            self.state.update_count,
            &self.state.l,
            d,
            self.policy.refactor_every,
            self.policy.condition_limit,
        );

        rank1_accumulate(&mut self.state.a, &x, d);
        axpy(&mut self.state.b, &x, reward);

        let outcome = if scheduled_refactor {
            self.refactor()
        } else if cholesky_rank1_update(&mut self.state.l, &x, d, MIN_RANK1_DIAG) {
            UpdateOutcome::Applied
        } else {
            self.refactor()
        };

        self.state.update_count += 1;
        outcome
    }

    fn refactor(&mut self) -> UpdateOutcome {
        let d = self.state.d;
        sanitize_covariance(&mut self.state.a, d, self.state.lambda);
        self.state.l = cholesky_decompose(&self.state.a, d, self.state.lambda);

        if diagnose(&self.state.a, &self.state.l, d).is_healthy {
            UpdateOutcome::Refactored
        } else {
            self.reset();
            UpdateOutcome::Reset
        }
    }

    /// Drop everything learned and return to A = lambda*I, b = 0.
    pub fn reset(&mut self) {
        let count = self.state.update_count;
        self.state = BanditSnapshot::init(self.state.d, self.state.lambda, self.state.alpha);
        self.state.update_count = count;
    }

    pub fn diagnose(&self) -> ModelDiagnostics {
        diagnose(&self.state.a, &self.state.l, self.state.d)
    }
}
