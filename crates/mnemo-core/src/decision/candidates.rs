//! Candidate strategy grid for one decision.
//!
//! Candidates step at most one grid position away from the current strategy
//! per knob, so a single decision can never jump the user across the whole
//! parameter space. When a habit profile is available the batch sizes are
//! generated around the user's observed batch median instead of the current
//! batch.

use crate::strategy::{DecisionMapper, BATCH_GRID, INTERVAL_GRID, RATIO_GRID};
use crate::types::{HabitProfile, StrategyParams};

pub fn generate_candidates(
    current: &StrategyParams,
    habit: Option<&HabitProfile>,
) -> Vec<StrategyParams> {
    let base = DecisionMapper::snap(current.clone().clamped());

    let difficulties = dedup(vec![
        base.difficulty.easier(),
        base.difficulty,
        base.difficulty.harder(),
    ]);
    let ratios = grid_neighbors_f64(&RATIO_GRID, base.new_ratio);
    let batch_center = habit
        .map(|h| h.rhythm.batch_median)
        .filter(|m| m.is_finite() && *m > 0.0)
        .map(|m| m.round() as i32)
        .unwrap_or(base.batch_size);
    let batches = grid_neighbors_i32(&BATCH_GRID, batch_center);
    let hints = dedup(vec![
        (base.hint_level - 1).max(0),
        base.hint_level,
        (base.hint_level + 1).min(2),
    ]);

    let mut out = Vec::new();
    for &difficulty in &difficulties {
        for &new_ratio in &ratios {
            for &batch_size in &batches {
                for &hint_level in &hints {
                    push_unique(
                        &mut out,
                        StrategyParams {
                            interval_scale: base.interval_scale,
                            new_ratio,
                            difficulty,
                            batch_size,
                            hint_level,
                        },
                    );
                }
            }
        }
    }

    // interval is deliberately sticky: it only appears in its own variants
    // of the otherwise-current strategy rather than in the full cross
    for interval_scale in grid_neighbors_f64(&INTERVAL_GRID, base.interval_scale) {
        push_unique(
            &mut out,
            StrategyParams {
                interval_scale,
                ..base.clone()
            },
        );
    }

    out
}

fn push_unique(out: &mut Vec<StrategyParams>, candidate: StrategyParams) {
    if !out.contains(&candidate) {
        out.push(candidate);
    }
}

fn dedup<T: PartialEq>(values: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(values.len());
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

fn grid_neighbors_f64(grid: &[f64], value: f64) -> Vec<f64> {
    let mut best = 0;
    for (i, g) in grid.iter().enumerate() {
        if (value - g).abs() < (value - grid[best]).abs() {
            best = i;
        }
    }
    let lo = best.saturating_sub(1);
    let hi = (best + 1).min(grid.len() - 1);
    dedup((lo..=hi).map(|i| grid[i]).collect())
}

fn grid_neighbors_i32(grid: &[i32], value: i32) -> Vec<i32> {
    let mut best = 0;
    for (i, g) in grid.iter().enumerate() {
        if (value - g).abs() < (value - grid[best]).abs() {
            best = i;
        }
    }
    let lo = best.saturating_sub(1);
    let hi = (best + 1).min(grid.len() - 1);
    dedup((lo..=hi).map(|i| grid[i]).collect())
}
