//! Decision mapping: smoothing toward the learner's target, protective
//! guardrails, and snapping onto the published parameter grids.
//!
//! Guardrail passes run in a fixed order (fatigue, motivation, attention,
//! trend) and only ever tighten: lower batch and new-ratio, easier
//! difficulty, more hints. Applying them twice changes nothing.

use crate::config::StrategyConfig;
use crate::types::{DecisionFactor, DifficultyLevel, StrategyParams, TrendDirection, UserState};

pub const INTERVAL_GRID: [f64; 5] = [0.5, 0.8, 1.0, 1.2, 1.5];
pub const RATIO_GRID: [f64; 4] = [0.1, 0.2, 0.3, 0.4];
pub const BATCH_GRID: [i32; 4] = [5, 8, 12, 16];
pub const HINT_GRID: [i32; 3] = [0, 1, 2];

/// Outcome of one mapping pass: the final parameters plus everything needed
/// to explain them.
#[derive(Debug, Clone)]
pub struct StrategyDecision {
    pub params: StrategyParams,
    pub factors: Vec<DecisionFactor>,
    pub changes: Vec<String>,
    pub should_break: bool,
}

#[derive(Debug, Clone)]
pub struct DecisionMapper {
    config: StrategyConfig,
}

impl DecisionMapper {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    /// Blends each knob toward the target with the configured inertia.
    /// Discrete knobs round; difficulty moves to the level nearest the
    /// blended weight, which steps it at most one rung per decision.
    pub fn smooth(&self, current: &StrategyParams, target: &StrategyParams) -> StrategyParams {
        let tau = self.config.smoothing_tau.clamp(0.0, 1.0);
        let blend = |c: f64, t: f64| tau * c + (1.0 - tau) * t;

        StrategyParams {
            interval_scale: blend(current.interval_scale, target.interval_scale),
            new_ratio: blend(current.new_ratio, target.new_ratio),
            difficulty: nearest_difficulty(blend(
                current.difficulty.feature_weight(),
                target.difficulty.feature_weight(),
            )),
            batch_size: blend(current.batch_size as f64, target.batch_size as f64).round() as i32,
            hint_level: blend(current.hint_level as f64, target.hint_level as f64).round() as i32,
        }
    }

    /// Nearest published grid value per knob.
    pub fn snap(params: StrategyParams) -> StrategyParams {
        StrategyParams {
            interval_scale: nearest_f64(&INTERVAL_GRID, params.interval_scale),
            new_ratio: nearest_f64(&RATIO_GRID, params.new_ratio),
            difficulty: params.difficulty,
            batch_size: nearest_i32(&BATCH_GRID, params.batch_size),
            hint_level: nearest_i32(&HINT_GRID, params.hint_level),
        }
    }

    /// Ordered tighten-only passes. Caps land on grid values so the output
    /// stays on-grid. Returns the guarded params, the factors that fired and
    /// whether a break should be suggested.
    pub fn guard(
        &self,
        mut params: StrategyParams,
        state: &UserState,
    ) -> (StrategyParams, Vec<DecisionFactor>, bool) {
        let mut factors = Vec::new();
        let mut should_break = false;

        if state.fatigue > self.config.fatigue_soft {
            params.batch_size = params.batch_size.min(5);
            params.new_ratio = params.new_ratio.min(0.1);
            let mut impact = String::from("batch<=5, newRatio<=0.1");
            if state.fatigue > self.config.fatigue_hard {
                params.difficulty = DifficultyLevel::Easy;
                params.hint_level = params.hint_level.max(2);
                should_break = true;
                impact.push_str(", difficulty=easy, hint>=2, suggest-break");
            }
            factors.push(DecisionFactor {
                name: "fatigue".into(),
                value: state.fatigue,
                impact,
            });
        }

        if state.motivation < self.config.motivation_soft {
            params.difficulty = DifficultyLevel::Easy;
            params.hint_level = params.hint_level.max(1);
            let mut impact = String::from("difficulty=easy, hint>=1");
            if state.motivation < self.config.motivation_hard {
                params.batch_size = params.batch_size.min(5);
                params.new_ratio = params.new_ratio.min(0.1);
                impact.push_str(", batch<=5, newRatio<=0.1");
            }
            factors.push(DecisionFactor {
                name: "motivation".into(),
                value: state.motivation,
                impact,
            });
        }

        if state.attention < self.config.attention_soft {
            params.hint_level = params.hint_level.max(1);
            params.new_ratio = params.new_ratio.min(0.2);
            let mut impact = String::from("hint>=1, newRatio<=0.2");
            if state.attention < self.config.attention_hard {
                params.batch_size = params.batch_size.min(5);
                impact.push_str(", batch<=5");
            }
            factors.push(DecisionFactor {
                name: "attention".into(),
                value: state.attention,
                impact,
            });
        }

        if state.trend == Some(TrendDirection::Down) {
            params.new_ratio = params.new_ratio.min(0.1);
            params.difficulty = params.difficulty.min(DifficultyLevel::Mid);
            factors.push(DecisionFactor {
                name: "trend".into(),
                value: -1.0,
                impact: "newRatio<=0.1, difficulty<=mid".into(),
            });
        }

        (params, factors, should_break)
    }

    /// Full mapping pass: smooth, clamp, snap, guard, and diff against the
    /// strategy the user came in with.
    pub fn decide(
        &self,
        current: &StrategyParams,
        target: &StrategyParams,
        state: &UserState,
    ) -> StrategyDecision {
        let smoothed = self.smooth(current, target);
        let snapped = Self::snap(smoothed.clamped());
        let (params, factors, should_break) = self.guard(snapped, state);
        let changes = diff(current, &params);

        StrategyDecision {
            params,
            factors,
            changes,
            should_break,
        }
    }
}

impl Default for DecisionMapper {
    fn default() -> Self {
        Self::new(StrategyConfig::default())
    }
}

fn nearest_f64(grid: &[f64], value: f64) -> f64 {
    let mut best = grid[0];
    for &g in grid {
        if (value - g).abs() < (value - best).abs() {
            best = g;
        }
    }
    best
}

fn nearest_i32(grid: &[i32], value: i32) -> i32 {
    let mut best = grid[0];
    for &g in grid {
        if (value - g).abs() < (value - best).abs() {
            best = g;
        }
    }
    best
}

fn nearest_difficulty(weight: f64) -> DifficultyLevel {
    let levels = [
        DifficultyLevel::Easy,
        DifficultyLevel::Mid,
        DifficultyLevel::Hard,
    ];
    let mut best = levels[0];
    for level in levels {
        if (weight - level.feature_weight()).abs() < (weight - best.feature_weight()).abs() {
            best = level;
        }
    }
    best
}

fn diff(before: &StrategyParams, after: &StrategyParams) -> Vec<String> {
    let mut changes = Vec::new();
    if (before.interval_scale - after.interval_scale).abs() > 1e-9 {
        changes.push(format!(
            "intervalScale {:.2} -> {:.2}",
            before.interval_scale, after.interval_scale
        ));
    }
    if (before.new_ratio - after.new_ratio).abs() > 1e-9 {
        changes.push(format!(
            "newRatio {:.2} -> {:.2}",
            before.new_ratio, after.new_ratio
        ));
    }
    if before.difficulty != after.difficulty {
        changes.push(format!(
            "difficulty {} -> {}",
            before.difficulty.as_str(),
            after.difficulty.as_str()
        ));
    }
    if before.batch_size != after.batch_size {
        changes.push(format!(
            "batchSize {} -> {}",
            before.batch_size, after.batch_size
        ));
    }
    if before.hint_level != after.hint_level {
        changes.push(format!(
            "hintLevel {} -> {}",
            before.hint_level, after.hint_level
        ));
    }
    changes
}
