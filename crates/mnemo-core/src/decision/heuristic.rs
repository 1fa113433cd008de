//! Threshold rules used when no trained model is available or trusted.
//!
//! The rules only read the estimated state and nudge the current strategy,
//! so the output is always explainable: each branch maps one threshold to
//! one adjustment.

use crate::types::{StrategyParams, TrendDirection, UserState};

#[derive(Debug, Clone)]
pub struct HeuristicLearner {
    fatigue_high: f64,
    attention_low: f64,
    motivation_low: f64,
}

impl HeuristicLearner {
    pub fn new() -> Self {
        Self {
            fatigue_high: 0.7,
            attention_low: 0.4,
            motivation_low: -0.3,
        }
    }

    /// Adjusts the current strategy from threshold rules alone.
    pub fn suggest(&self, state: &UserState, current: &StrategyParams) -> StrategyParams {
        let mut params = current.clone();

        if state.fatigue > self.fatigue_high {
            params.batch_size = ((params.batch_size as f64) * 0.6).round() as i32;
            params.difficulty = params.difficulty.easier();
            params.new_ratio *= 0.5;
        }

        if state.attention < self.attention_low {
            params.hint_level += 1;
            params.new_ratio *= 0.7;
        }

        if state.motivation < self.motivation_low {
            params.difficulty = params.difficulty.easier();
            params.hint_level += 1;
        } else if state.motivation > 0.7 && state.fatigue < 0.3 && state.attention > 0.7 {
            // everything is going well, push a little harder
            params.difficulty = params.difficulty.harder();
            params.new_ratio += 0.1;
            params.batch_size += 4;
        }

        let mem = state.cognitive.mem;
        if mem < 0.4 {
            params.interval_scale *= 0.8;
        } else if mem > 0.7 {
            params.interval_scale *= 1.2;
        }

        params.clamped()
    }

    /// Multiplicative confidence: every stressed signal discounts trust in
    /// the suggestion, floored so downstream weighting never zeroes out.
    pub fn confidence(&self, state: &UserState) -> f64 {
        let mut confidence: f64 = 1.0;
        if state.fatigue > self.fatigue_high {
            confidence *= 0.8;
        }
        if state.attention < self.attention_low {
            confidence *= 0.8;
        }
        if state.motivation < self.motivation_low {
            confidence *= 0.8;
        }
        if state.trend == Some(TrendDirection::Down) {
            confidence *= 0.8;
        }
        if state.confidence < 0.3 {
            confidence *= 0.8;
        }
        if state.cognitive.mean() < 0.3 {
            confidence *= 0.8;
        }
        confidence.max(0.3)
    }
}

impl Default for HeuristicLearner {
    fn default() -> Self {
        Self::new()
    }
}
