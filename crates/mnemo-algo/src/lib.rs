//! # mnemo-algo
//!
//! Pure algorithm core for adaptive review scheduling. No IO, no async, no
//! logging; everything here is deterministic given its inputs (the Thompson
//! sampler under a seed) and safe to call from hot paths.
//!
//! Modules:
//!
//! - [`matrix`] - dense Cholesky kernels (decompose, rank-1 update,
//!   triangular solves, quadratic forms, padded expansion)
//! - [`sanitize`] - numeric guards and model health diagnostics
//! - [`linucb`] - linear UCB contextual bandit over caller-built context
//!   vectors, factor-cached, with dimension migration
//! - [`thompson`] - Beta-Bernoulli Thompson sampler over string-keyed
//!   actions with a contextual blend
//! - [`types`] - shared constants and persisted snapshot types

pub mod linucb;
pub mod matrix;
pub mod sanitize;
pub mod thompson;
pub mod types;

pub use linucb::{LinUcbModel, RefactorPolicy};
pub use thompson::{SampledChoice, ThompsonSampler};
pub use types::{
    BanditSnapshot, ModelDiagnostics, SelectionOutcome, UcbStats, UpdateOutcome,
    FEATURE_DIMENSION,
};
