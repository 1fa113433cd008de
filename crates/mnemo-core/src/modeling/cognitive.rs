use std::collections::VecDeque;

use crate::config::CognitiveConfig;
use crate::types::CognitiveProfile;

/// Estimates {mem, speed, stability} in [0, 1].
///
/// Each trait is the blend `lambda * short + (1 - lambda) * ema` where the
/// short statistic comes from the recent sample window, the EMA side moves
/// slowly, and `lambda = 1 - exp(-n / k0)` grows with the window fill. Sparse
/// evidence leans on the long-term estimate, a full window trusts the data.
pub struct CognitiveProfiler {
    config: CognitiveConfig,
    ema: CognitiveProfile,
    accuracy_history: VecDeque<f64>,
    rt_history: VecDeque<f64>,
}

impl CognitiveProfiler {
    pub fn new(config: CognitiveConfig) -> Self {
        let window = config.window.max(1);
        Self {
            config,
            ema: CognitiveProfile::default(),
            accuracy_history: VecDeque::with_capacity(window),
            rt_history: VecDeque::with_capacity(window),
        }
    }

    pub fn update(&mut self, accuracy: f64, response_time_ms: i64) -> CognitiveProfile {
        let accuracy = accuracy.clamp(0.0, 1.0);
        push_bounded(&mut self.accuracy_history, accuracy, self.config.window);
        push_bounded(
            &mut self.rt_history,
            response_time_ms.max(1) as f64,
            self.config.window,
        );

        let short_mem = mean(&self.accuracy_history);
        let short_speed = 1.0
            - (mean(&self.rt_history) / self.config.speed_baseline_ms / 3.0).min(1.0);
        let short_stability = if self.accuracy_history.len() >= 3 {
            1.0 - (variance(&self.accuracy_history) * 4.0).min(1.0)
        } else {
            0.5
        };

        let alpha = self.config.ema_alpha;
        self.ema.mem = (alpha * short_mem + (1.0 - alpha) * self.ema.mem).clamp(0.0, 1.0);
        self.ema.speed = (alpha * short_speed + (1.0 - alpha) * self.ema.speed).clamp(0.0, 1.0);
        self.ema.stability =
            (alpha * short_stability + (1.0 - alpha) * self.ema.stability).clamp(0.0, 1.0);

        let n = self.accuracy_history.len() as f64;
        let lambda = 1.0 - (-n / self.config.k0.max(1e-6)).exp();
        let blend = |short: f64, ema: f64| (lambda * short + (1.0 - lambda) * ema).clamp(0.0, 1.0);

        CognitiveProfile {
            mem: blend(short_mem, self.ema.mem),
            speed: blend(short_speed, self.ema.speed),
            stability: blend(short_stability, self.ema.stability),
        }
    }

    /// The slow side of the blend, which is what gets persisted.
    pub fn baseline(&self) -> &CognitiveProfile {
        &self.ema
    }

    pub fn set_profile(&mut self, profile: CognitiveProfile) {
        self.ema = CognitiveProfile {
            mem: profile.mem.clamp(0.0, 1.0),
            speed: profile.speed.clamp(0.0, 1.0),
            stability: profile.stability.clamp(0.0, 1.0),
        };
    }

    pub fn reset(&mut self) {
        self.ema = CognitiveProfile::default();
        self.accuracy_history.clear();
        self.rt_history.clear();
    }
}

impl Default for CognitiveProfiler {
    fn default() -> Self {
        Self::new(CognitiveConfig::default())
    }
}

fn push_bounded(buf: &mut VecDeque<f64>, value: f64, cap: usize) {
    buf.push_back(value);
    while buf.len() > cap.max(1) {
        buf.pop_front();
    }
}

fn mean(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.5;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64
}
