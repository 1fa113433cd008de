use crate::config::FatigueConfig;

/// Deltas extracted from the recent window, all non-negative contributions.
#[derive(Debug, Clone, Copy, Default)]
pub struct FatigueInputs {
    /// Increase in error rate against the window baseline.
    pub error_rate_delta: f64,
    /// Relative response-time slowdown against the baseline.
    pub rt_increase: f64,
    /// Retries on the current item.
    pub repeat_count: i32,
    pub break_minutes: Option<f64>,
}

/// Fatigue in [floor, 1].
///
/// Each update computes an accumulation path and a break-decay path and keeps
/// the larger of the two: a short pause never erases fatigue that the ongoing
/// behavior keeps rebuilding. Only a long break resets it outright.
pub struct FatigueEstimator {
    config: FatigueConfig,
    current_value: f64,
}

impl FatigueEstimator {
    pub fn new(config: FatigueConfig) -> Self {
        Self {
            config,
            current_value: 0.0,
        }
    }

    pub fn update(&mut self, inputs: FatigueInputs) -> f64 {
        if let Some(minutes) = inputs.break_minutes {
            if minutes > self.config.long_break_minutes {
                self.current_value = self.config.reset_value;
                return self.current_value;
            }
        }

        let accumulated = self.current_value
            + self.config.beta * inputs.error_rate_delta.max(0.0)
            + self.config.gamma * inputs.rt_increase.max(0.0)
            + self.config.delta * (inputs.repeat_count.max(0) as f64 / 5.0).min(1.0);

        let decayed = match inputs.break_minutes {
            Some(minutes) if minutes > 0.0 => {
                self.current_value * (-self.config.decay_k * minutes).exp()
            }
            _ => self.current_value,
        };

        self.current_value = accumulated.max(decayed).clamp(self.config.floor, 1.0);
        self.current_value
    }

    pub fn current(&self) -> f64 {
        self.current_value
    }

    pub fn set_value(&mut self, value: f64) {
        self.current_value = value.clamp(0.0, 1.0);
    }

    pub fn reset(&mut self) {
        self.current_value = 0.0;
    }
}

impl Default for FatigueEstimator {
    fn default() -> Self {
        Self::new(FatigueConfig::default())
    }
}
