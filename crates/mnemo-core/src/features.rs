//! Behavior feature extraction: the per-user sliding event window, normalized
//! behavior signals for the estimators, and the labeled context vector fed to
//! the learner.

use std::collections::VecDeque;

use chrono::{Datelike, Timelike};
use mnemo_algo::FEATURE_DIMENSION;

use crate::config::{FeatureConfig, SignalBaseline};
use crate::types::{FeatureVector, RawEvent, StrategyParams, UserState};

/// Slow EMA rate for the long-term response-time baseline behind drift.
const BASELINE_ALPHA: f64 = 0.05;

pub const FEATURE_LABELS: [&str; FEATURE_DIMENSION] = [
    "attention",
    "fatigue",
    "motivation",
    "cognition",
    "confidence",
    "error_rate",
    "act_difficulty",
    "act_new_ratio",
    "act_batch",
    "act_interval",
    "act_hint",
    "interaction_scale",
    "tod_sin",
    "tod_cos",
    "dow",
    "x_attn_difficulty",
    "x_energy_new",
    "x_motiv_difficulty",
    "x_error_difficulty",
    "x_cog_interval",
    "x_conf_batch",
    "bias",
];

#[derive(Debug, Clone, Copy)]
pub struct WindowSample {
    pub response_time_ms: i64,
    pub is_correct: bool,
    pub timestamp_ms: i64,
}

/// Rolling statistics over the recent window, with priors for the empty case.
#[derive(Debug, Clone, Copy)]
pub struct WindowStats {
    pub mean_rt_ms: f64,
    pub rt_cv: f64,
    pub accuracy: f64,
    /// Relative deviation of the window mean from the long-term baseline.
    pub drift: f64,
    pub count: usize,
}

impl Default for WindowStats {
    fn default() -> Self {
        Self {
            mean_rt_ms: 3000.0,
            rt_cv: 0.0,
            accuracy: 0.7,
            drift: 0.0,
            count: 0,
        }
    }
}

/// Bounded sliding window of accepted events for one user. Rejected events
/// never reach this type.
#[derive(Debug, Clone)]
pub struct EventWindow {
    capacity: usize,
    samples: VecDeque<WindowSample>,
    baseline_rt_ms: Option<f64>,
}

impl EventWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity.max(1)),
            baseline_rt_ms: None,
        }
    }

    pub fn push(&mut self, event: &RawEvent) {
        let rt = event.response_time_ms;
        self.baseline_rt_ms = Some(match self.baseline_rt_ms {
            Some(base) => base * (1.0 - BASELINE_ALPHA) + rt as f64 * BASELINE_ALPHA,
            None => rt as f64,
        });

        self.samples.push_back(WindowSample {
            response_time_ms: rt,
            is_correct: event.is_correct,
            timestamp_ms: event.timestamp_ms,
        });
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn stats(&self) -> WindowStats {
        if self.samples.is_empty() {
            return WindowStats::default();
        }

        let n = self.samples.len() as f64;
        let mean_rt =
            self.samples.iter().map(|s| s.response_time_ms as f64).sum::<f64>() / n;
        let rt_var = self
            .samples
            .iter()
            .map(|s| (s.response_time_ms as f64 - mean_rt).powi(2))
            .sum::<f64>()
            / n;
        let rt_cv = if mean_rt > 0.0 {
            rt_var.sqrt() / mean_rt
        } else {
            0.0
        };
        let accuracy =
            self.samples.iter().filter(|s| s.is_correct).count() as f64 / n;
        let drift = match self.baseline_rt_ms {
            Some(base) if base > 0.0 => ((mean_rt - base) / base).abs(),
            _ => 0.0,
        };

        WindowStats {
            mean_rt_ms: mean_rt,
            rt_cv,
            accuracy,
            drift,
            count: self.samples.len(),
        }
    }

    /// Accuracy swing between the older and the newer half of the window.
    /// Near 1.0 means the recent regime flipped.
    pub fn accuracy_spread(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let half = self.samples.len() / 2;
        let acc = |iter: &mut dyn Iterator<Item = &WindowSample>| {
            let mut total = 0usize;
            let mut correct = 0usize;
            for s in iter {
                total += 1;
                if s.is_correct {
                    correct += 1;
                }
            }
            correct as f64 / total.max(1) as f64
        };
        let first = acc(&mut self.samples.iter().take(half));
        let last = acc(&mut self.samples.iter().skip(half));
        (first - last).abs()
    }
}

/// Normalized behavior signals in [0, 1], extracted per accepted event.
#[derive(Debug, Clone, Copy)]
pub struct BehaviorSignals {
    pub rt_mean: f64,
    pub rt_cv: f64,
    pub pause: f64,
    pub switch: f64,
    pub drift: f64,
    pub focus_loss: f64,
    pub interaction_density: f64,
    pub accuracy: f64,
}

impl BehaviorSignals {
    pub fn extract(event: &RawEvent, stats: &WindowStats, config: &FeatureConfig) -> Self {
        Self {
            rt_mean: squash(stats.mean_rt_ms, &config.response_time),
            rt_cv: stats.rt_cv.clamp(0.0, 1.0),
            pause: squash(event.pause_count as f64, &config.pause),
            switch: squash(event.switch_count as f64, &config.switches),
            drift: stats.drift.clamp(0.0, 1.0),
            focus_loss: squash(
                event.focus_loss_duration_ms.unwrap_or(0) as f64,
                &config.focus_loss,
            ),
            interaction_density: event
                .interaction_density
                .unwrap_or(config.density.mean)
                .clamp(0.0, 1.0),
            accuracy: stats.accuracy.clamp(0.0, 1.0),
        }
    }

    /// How jumpy the recent behavior is, used to speed up attention tracking.
    pub fn volatility(&self) -> f64 {
        ((self.rt_cv + self.switch + self.drift) / 3.0).clamp(0.0, 1.0)
    }
}

/// Linear squash centered on the baseline mean: mean maps to 0.5 and two
/// standard deviations to the edge of [0, 1].
fn squash(x: f64, baseline: &SignalBaseline) -> f64 {
    if baseline.std_dev <= f64::EPSILON {
        return 0.5;
    }
    ((x - baseline.mean) / (4.0 * baseline.std_dev) + 0.5).clamp(0.0, 1.0)
}

/// Builds the labeled context vector for one (state, candidate action) pair.
#[derive(Debug, Clone, Default)]
pub struct FeatureBuilder {
    config: FeatureConfig,
}

impl FeatureBuilder {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn window(&self) -> EventWindow {
        EventWindow::new(self.config.window_capacity)
    }

    /// Assembles the full context vector. The action block and cross terms
    /// depend on `strategy`, so candidate scoring calls this once per arm.
    pub fn build(
        &self,
        state: &UserState,
        strategy: &StrategyParams,
        stats: &WindowStats,
        interaction_count: u64,
        timestamp_ms: i64,
    ) -> FeatureVector {
        let motivation_norm = ((state.motivation + 1.0) / 2.0).clamp(0.0, 1.0);
        let cognitive_mean = state.cognitive.mean();
        let error_rate = (1.0 - stats.accuracy).clamp(0.0, 1.0);

        let act_difficulty = strategy.difficulty.feature_weight();
        let act_new_ratio = strategy.new_ratio;
        let act_batch = strategy.batch_size as f64 / 20.0;
        let act_interval = strategy.interval_scale / 2.0;
        let act_hint = strategy.hint_level as f64 / 2.0;

        let interaction_scale = ((1.0 + interaction_count as f64).ln() / 10.0).min(1.0);

        let (hour, dow) = clock_parts(timestamp_ms);
        let tod_angle = 2.0 * std::f64::consts::PI * hour / 24.0;

        let values = vec![
            state.attention,
            state.fatigue,
            motivation_norm,
            cognitive_mean,
            state.confidence,
            error_rate,
            act_difficulty,
            act_new_ratio,
            act_batch,
            act_interval,
            act_hint,
            interaction_scale,
            tod_angle.sin(),
            tod_angle.cos(),
            dow / 6.0,
            state.attention * act_difficulty,
            (1.0 - state.fatigue) * act_new_ratio,
            motivation_norm * act_difficulty,
            error_rate * act_difficulty,
            cognitive_mean * act_interval,
            state.confidence * act_batch,
            1.0,
        ];
        debug_assert_eq!(values.len(), FEATURE_DIMENSION);

        FeatureVector::new(
            values,
            FEATURE_LABELS.iter().map(|s| s.to_string()).collect(),
            timestamp_ms,
        )
    }
}

fn clock_parts(timestamp_ms: i64) -> (f64, f64) {
    match chrono::DateTime::from_timestamp_millis(timestamp_ms) {
        Some(dt) => (
            dt.hour() as f64,
            dt.weekday().num_days_from_monday() as f64,
        ),
        None => (12.0, 0.0),
    }
}
