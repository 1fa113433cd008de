//! # mnemo-core
//!
//! Adaptive review personalization engine. One event in, one decision out:
//! behavior features, latent-state estimation, cold-start phasing, bandit
//! strategy selection, guardrails, reward shaping and delayed-reward
//! reconciliation, all wrapped in per-user locking, a hard timeout and a
//! circuit breaker so callers always get an answer.
//!
//! Modules:
//!
//! - [`types`] - events, state, strategy and result DTOs
//! - [`config`] - per-concern configuration with env overrides
//! - [`features`] - sliding window, behavior signals and the 22-dim vector
//! - [`modeling`] - attention, fatigue, cognitive, motivation, trend, habit
//! - [`decision`] - cold start, candidate grid and the pluggable learners
//! - [`strategy`] - smoothing, grid snapping and tighten-only guardrails
//! - [`reward`] - immediate reward shaping
//! - [`engine`] - the cached per-user pipeline behind the resilience wrapper
//! - [`resilience`] - locks, circuit breaker and the fallback ladder
//! - [`persistence`] - repository traits plus in-memory implementations
//! - [`reconcile`] - delayed-reward queue sweep
//! - [`worker`] - cron wiring for the sweep and cache cleanup
//! - [`telemetry`] - counters, latency buckets and the invariant monitor
//! - [`error`] - engine error taxonomy and fallback reasons
//! - [`logging`] - tracing init with optional rolling file output

pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod features;
pub mod logging;
pub mod modeling;
pub mod persistence;
pub mod reconcile;
pub mod resilience;
pub mod reward;
pub mod strategy;
pub mod telemetry;
pub mod types;
pub mod worker;

pub use config::{EngineConfig, LearnerKind};
pub use engine::{AdaptiveEngine, CacheStats, EngineStores};
pub use error::{EngineError, FallbackReason};
pub use logging::{init_tracing, FileLogGuard};
pub use reconcile::{Reconciler, RewardPayload, SweepStats};
pub use telemetry::{EngineTelemetry, TelemetrySnapshot};
pub use worker::{WorkerError, WorkerManager};
#[allow(unused_imports)]
pub use types::*;
