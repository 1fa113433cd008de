use crate::config::AttentionConfig;
use crate::features::BehaviorSignals;

/// Tracks attention in [0, 1] from weighted behavior load.
///
/// The weighted load (response time, variability, pauses, switches, drift,
/// low interaction density, focus loss) passes through a sigmoid on its
/// negative loading, then an EMA whose inertia shrinks when behavior turns
/// volatile, so sharp attention drops register quickly while calm stretches
/// stay smooth.
pub struct AttentionMonitor {
    config: AttentionConfig,
    current_value: f64,
}

impl AttentionMonitor {
    pub fn new(config: AttentionConfig) -> Self {
        Self {
            config,
            current_value: 0.7,
        }
    }

    pub fn update(&mut self, signals: &BehaviorSignals) -> f64 {
        let w = &self.config.weights;
        let total = w.rt_mean + w.rt_cv + w.pause + w.switch + w.drift + w.interaction
            + w.focus_loss;

        let load = (w.rt_mean * signals.rt_mean
            + w.rt_cv * signals.rt_cv
            + w.pause * signals.pause
            + w.switch * signals.switch
            + w.drift * signals.drift
            + w.interaction * (1.0 - signals.interaction_density)
            + w.focus_loss * signals.focus_loss)
            / total.max(1e-6);

        let raw = sigmoid(-self.config.sigmoid_gain * (load - 0.5));

        let beta = (self.config.base_beta * (1.0 - 0.5 * signals.volatility()))
            .clamp(self.config.beta_min, self.config.beta_max);
        self.current_value = (beta * self.current_value + (1.0 - beta) * raw).clamp(0.0, 1.0);
        self.current_value
    }

    pub fn current(&self) -> f64 {
        self.current_value
    }

    pub fn set_value(&mut self, value: f64) {
        self.current_value = value.clamp(0.0, 1.0);
    }

    pub fn reset(&mut self) {
        self.current_value = 0.7;
    }
}

impl Default for AttentionMonitor {
    fn default() -> Self {
        Self::new(AttentionConfig::default())
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
