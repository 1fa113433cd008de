//! Lock-free engine counters and invariant monitoring.
//!
//! Counters are plain atomics read through a snapshot struct; there is no
//! wire format here. The invariant monitor checks every outbound result
//! against the published value ranges, warn-logs violations uncondition-
//! ally, and samples a small share of healthy traffic at debug level.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::FallbackReason;
use crate::types::{ColdStartPhase, ProcessResult};

/// Upper bucket bounds in milliseconds; one overflow bucket follows.
pub const LATENCY_BUCKETS_MS: [u64; 6] = [10, 25, 50, 100, 250, 500];

#[derive(Debug, Default)]
pub struct EngineTelemetry {
    decisions: AtomicU64,
    degraded: AtomicU64,
    fallback_circuit_open: AtomicU64,
    fallback_timeout: AtomicU64,
    fallback_exception: AtomicU64,
    fallback_degraded_state: AtomicU64,
    breaker_opened: AtomicU64,
    breaker_half_opened: AtomicU64,
    breaker_closed: AtomicU64,
    rewards_enqueued: AtomicU64,
    rewards_replayed: AtomicU64,
    rewards_failed: AtomicU64,
    model_refactors: AtomicU64,
    model_resets: AtomicU64,
    total_latency_us: AtomicU64,
    latency_buckets: [AtomicU64; LATENCY_BUCKETS_MS.len() + 1],
}

impl EngineTelemetry {
    pub fn record_decision(&self, latency_us: u64) {
        self.decisions.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);

        let latency_ms = latency_us / 1000;
        let mut bucket = LATENCY_BUCKETS_MS.len();
        for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            if latency_ms <= *bound {
                bucket = i;
                break;
            }
        }
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self, reason: FallbackReason) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
        let counter = match reason {
            FallbackReason::CircuitOpen => &self.fallback_circuit_open,
            FallbackReason::Timeout => &self.fallback_timeout,
            FallbackReason::Exception => &self.fallback_exception,
            FallbackReason::DegradedState => &self.fallback_degraded_state,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_breaker_opened(&self) {
        self.breaker_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_breaker_half_opened(&self) {
        self.breaker_half_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_breaker_closed(&self) {
        self.breaker_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reward_enqueued(&self) {
        self.rewards_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reward_replayed(&self) {
        self.rewards_replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reward_failed(&self) {
        self.rewards_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_model_refactor(&self) {
        self.model_refactors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_model_reset(&self) {
        self.model_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decisions(&self) -> u64 {
        self.decisions.load(Ordering::Relaxed)
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let calls = self.decisions.load(Ordering::Relaxed);
        if calls == 0 {
            return 0.0;
        }
        let total_us = self.total_latency_us.load(Ordering::Relaxed);
        (total_us as f64 / calls as f64) / 1000.0
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let buckets = LATENCY_BUCKETS_MS
            .iter()
            .map(|b| Some(*b))
            .chain(std::iter::once(None))
            .zip(self.latency_buckets.iter())
            .map(|(le_ms, counter)| LatencyBucket {
                le_ms,
                count: counter.load(Ordering::Relaxed),
            })
            .collect();

        TelemetrySnapshot {
            decisions: self.decisions.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            fallback_circuit_open: self.fallback_circuit_open.load(Ordering::Relaxed),
            fallback_timeout: self.fallback_timeout.load(Ordering::Relaxed),
            fallback_exception: self.fallback_exception.load(Ordering::Relaxed),
            fallback_degraded_state: self.fallback_degraded_state.load(Ordering::Relaxed),
            breaker_opened: self.breaker_opened.load(Ordering::Relaxed),
            breaker_half_opened: self.breaker_half_opened.load(Ordering::Relaxed),
            breaker_closed: self.breaker_closed.load(Ordering::Relaxed),
            rewards_enqueued: self.rewards_enqueued.load(Ordering::Relaxed),
            rewards_replayed: self.rewards_replayed.load(Ordering::Relaxed),
            rewards_failed: self.rewards_failed.load(Ordering::Relaxed),
            model_refactors: self.model_refactors.load(Ordering::Relaxed),
            model_resets: self.model_resets.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            latency_buckets: buckets,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyBucket {
    /// Upper bound in ms; `None` is the overflow bucket.
    pub le_ms: Option<u64>,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub decisions: u64,
    pub degraded: u64,
    pub fallback_circuit_open: u64,
    pub fallback_timeout: u64,
    pub fallback_exception: u64,
    pub fallback_degraded_state: u64,
    pub breaker_opened: u64,
    pub breaker_half_opened: u64,
    pub breaker_closed: u64,
    pub rewards_enqueued: u64,
    pub rewards_replayed: u64,
    pub rewards_failed: u64,
    pub model_refactors: u64,
    pub model_resets: u64,
    pub avg_latency_ms: f64,
    pub latency_buckets: Vec<LatencyBucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvariantViolation {
    pub field: String,
    pub value: f64,
    pub expected_min: f64,
    pub expected_max: f64,
}

/// Range checks over an outbound result. Everything here is a bug when it
/// fires: the estimators clamp on write and the mapper snaps to grids.
pub fn check_invariants(result: &ProcessResult) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let state = &result.state;
    let strategy = &result.strategy;

    check_range(&mut violations, "attention", state.attention, 0.0, 1.0);
    check_range(&mut violations, "fatigue", state.fatigue, 0.0, 1.0);
    check_range(&mut violations, "motivation", state.motivation, -1.0, 1.0);
    check_range(&mut violations, "confidence", state.confidence, 0.0, 1.0);
    check_range(&mut violations, "cognitive.mem", state.cognitive.mem, 0.0, 1.0);
    check_range(
        &mut violations,
        "cognitive.speed",
        state.cognitive.speed,
        0.0,
        1.0,
    );
    check_range(
        &mut violations,
        "cognitive.stability",
        state.cognitive.stability,
        0.0,
        1.0,
    );
    check_range(
        &mut violations,
        "strategy.intervalScale",
        strategy.interval_scale,
        0.5,
        1.5,
    );
    check_range(
        &mut violations,
        "strategy.newRatio",
        strategy.new_ratio,
        0.1,
        0.4,
    );
    check_range(
        &mut violations,
        "strategy.batchSize",
        strategy.batch_size as f64,
        5.0,
        16.0,
    );
    check_range(
        &mut violations,
        "strategy.hintLevel",
        strategy.hint_level as f64,
        0.0,
        2.0,
    );
    check_range(&mut violations, "reward.value", result.reward.value, -1.0, 1.0);

    check_finite(&mut violations, "attention", state.attention);
    check_finite(&mut violations, "fatigue", state.fatigue);
    check_finite(&mut violations, "motivation", state.motivation);
    check_finite(&mut violations, "reward.value", result.reward.value);
    if let Some(fv) = &result.feature_vector {
        for (i, v) in fv.values.iter().enumerate() {
            if !v.is_finite() {
                check_finite(&mut violations, &format!("feature[{}]", i), *v);
            }
        }
    }

    violations
}

fn check_range(
    violations: &mut Vec<InvariantViolation>,
    field: &str,
    value: f64,
    min: f64,
    max: f64,
) {
    if value < min || value > max {
        violations.push(InvariantViolation {
            field: field.to_string(),
            value,
            expected_min: min,
            expected_max: max,
        });
    }
}

fn check_finite(violations: &mut Vec<InvariantViolation>, field: &str, value: f64) {
    if !value.is_finite() {
        violations.push(InvariantViolation {
            field: field.to_string(),
            value,
            expected_min: f64::NEG_INFINITY,
            expected_max: f64::INFINITY,
        });
    }
}

/// Samples healthy traffic, keeps every anomaly and cold-start decision.
#[derive(Debug, Clone)]
pub struct InvariantMonitor {
    sample_rate: f64,
}

impl InvariantMonitor {
    pub fn new() -> Self {
        let sample_rate = std::env::var("MNEMO_MONITOR_SAMPLE_RATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.05);
        Self { sample_rate }
    }

    pub fn with_sample_rate(sample_rate: f64) -> Self {
        Self {
            sample_rate: sample_rate.clamp(0.0, 1.0),
        }
    }

    /// Checks one result and logs what the sampling policy keeps. Returns
    /// the violations so callers can count them.
    pub fn observe(&self, user_id: &str, result: &ProcessResult) -> Vec<InvariantViolation> {
        let violations = check_invariants(result);
        let is_anomaly = !violations.is_empty();
        let is_cold_start = matches!(
            result.phase,
            Some(ColdStartPhase::Classify) | Some(ColdStartPhase::Explore)
        );

        if is_anomaly {
            for v in &violations {
                tracing::warn!(
                    user_id = %user_id,
                    field = %v.field,
                    value = v.value,
                    expected_min = v.expected_min,
                    expected_max = v.expected_max,
                    "state invariant violated"
                );
            }
        } else if self.should_sample(is_cold_start) {
            tracing::debug!(
                user_id = %user_id,
                latency_ms = result.latency_ms,
                degraded = result.degraded,
                phase = ?result.phase,
                "decision sampled"
            );
        }

        violations
    }

    fn should_sample(&self, is_cold_start: bool) -> bool {
        if is_cold_start {
            return true;
        }
        rand::rng().random::<f64>() < self.sample_rate
    }
}

impl Default for InvariantMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Action, DecisionExplanation, Reward, RewardBreakdown, StrategyParams, UserState,
    };

    fn sample_result() -> ProcessResult {
        let strategy = StrategyParams::default();
        ProcessResult {
            state: UserState::default(),
            action: Action::from(strategy.clone()),
            strategy,
            reward: Reward::new(0.4, RewardBreakdown::default(), 0),
            explanation: DecisionExplanation::default(),
            feature_vector: None,
            phase: None,
            should_break: false,
            suggestion: None,
            degraded: false,
            fallback_reason: None,
            latency_ms: 12,
        }
    }

    #[test]
    fn healthy_result_has_no_violations() {
        assert!(check_invariants(&sample_result()).is_empty());
    }

    #[test]
    fn out_of_band_state_is_flagged() {
        let mut result = sample_result();
        result.state.fatigue = 1.7;
        result.state.motivation = -2.0;
        let violations = check_invariants(&result);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].field, "fatigue");
    }

    #[test]
    fn nan_reward_is_flagged() {
        let mut result = sample_result();
        result.reward.value = f64::NAN;
        let violations = check_invariants(&result);
        assert!(violations.iter().any(|v| v.field == "reward.value"));
    }

    #[test]
    fn off_grid_strategy_is_flagged() {
        let mut result = sample_result();
        result.strategy.batch_size = 40;
        let violations = check_invariants(&result);
        assert!(violations.iter().any(|v| v.field == "strategy.batchSize"));
    }

    #[test]
    fn counters_accumulate_and_snapshot() {
        let telemetry = EngineTelemetry::default();
        telemetry.record_decision(8_000);
        telemetry.record_decision(40_000);
        telemetry.record_fallback(FallbackReason::Timeout);
        telemetry.record_reward_enqueued();
        telemetry.record_breaker_opened();

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.decisions, 2);
        assert_eq!(snapshot.degraded, 1);
        assert_eq!(snapshot.fallback_timeout, 1);
        assert_eq!(snapshot.rewards_enqueued, 1);
        assert_eq!(snapshot.breaker_opened, 1);
        assert!((snapshot.avg_latency_ms - 24.0).abs() < 1e-9);
    }

    #[test]
    fn latency_lands_in_the_right_bucket() {
        let telemetry = EngineTelemetry::default();
        telemetry.record_decision(8_000); // 8 ms -> bucket <=10
        telemetry.record_decision(90_000); // 90 ms -> bucket <=100
        telemetry.record_decision(900_000); // 900 ms -> overflow

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.latency_buckets[0].count, 1);
        assert_eq!(snapshot.latency_buckets[3].count, 1);
        assert_eq!(snapshot.latency_buckets.last().map(|b| b.count), Some(1));
    }

    #[test]
    fn monitor_returns_violations_regardless_of_sampling() {
        let monitor = InvariantMonitor::with_sample_rate(0.0);
        let mut result = sample_result();
        result.state.attention = 9.0;
        let violations = monitor.observe("u1", &result);
        assert_eq!(violations.len(), 1);
    }
}
