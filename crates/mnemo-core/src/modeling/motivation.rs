use crate::config::MotivationConfig;

#[derive(Debug, Clone, Copy, Default)]
pub struct MotivationSignal {
    pub is_correct: bool,
    pub is_quit: bool,
}

/// Motivation in [-1, 1] with a leaky integrator:
/// `M' = rho * M + kappa * success - lambda * failure - mu * quit`.
///
/// A consecutive-low counter ticks while the value sits under the low
/// threshold and clears once it recovers to non-negative; in between it holds.
pub struct MotivationTracker {
    config: MotivationConfig,
    current_value: f64,
    consecutive_low: u32,
}

impl MotivationTracker {
    pub fn new(config: MotivationConfig) -> Self {
        Self {
            config,
            current_value: 0.5,
            consecutive_low: 0,
        }
    }

    pub fn update(&mut self, signal: MotivationSignal) -> f64 {
        let mut next = self.config.rho * self.current_value;
        if signal.is_quit {
            next -= self.config.mu;
        } else if signal.is_correct {
            next += self.config.kappa;
        } else {
            next -= self.config.lambda;
        }
        self.current_value = next.clamp(-1.0, 1.0);

        if self.current_value < self.config.low_threshold {
            self.consecutive_low = self.consecutive_low.saturating_add(1);
        } else if self.current_value >= 0.0 {
            self.consecutive_low = 0;
        }

        self.current_value
    }

    pub fn current(&self) -> f64 {
        self.current_value
    }

    pub fn long_term_low(&self) -> bool {
        self.consecutive_low >= self.config.consecutive_low_limit
    }

    pub fn set_value(&mut self, value: f64) {
        self.current_value = value.clamp(-1.0, 1.0);
    }

    pub fn reset(&mut self) {
        self.current_value = 0.5;
        self.consecutive_low = 0;
    }
}

impl Default for MotivationTracker {
    fn default() -> Self {
        Self::new(MotivationConfig::default())
    }
}
