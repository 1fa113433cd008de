//! Reward shaping for one observed interaction.
//!
//! Four sub-scores in [0, 1] blend into a single score, mapped onto
//! [-1, 1]. Quitting mid-session floors the reward regardless of how the
//! answered items went.

use crate::config::RewardConfig;
use crate::features::WindowStats;
use crate::types::{RawEvent, Reward, RewardBreakdown};

#[derive(Debug, Clone)]
pub struct RewardShaper {
    config: RewardConfig,
}

impl RewardShaper {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    /// Shapes the reward for one event against the user's recent window.
    ///
    /// Sub-scores: correctness of this answer, response speed against the
    /// baseline, response-time steadiness over the window, and window
    /// accuracy as a retention proxy.
    pub fn shape(&self, event: &RawEvent, stats: &WindowStats, now_ms: i64) -> Reward {
        let accuracy = if event.is_correct { 1.0 } else { 0.0 };
        let speed = (1.0
            - event.response_time_ms as f64 / (2.0 * self.config.speed_baseline_ms))
            .clamp(0.0, 1.0);
        let stability = (1.0 - stats.rt_cv).clamp(0.0, 1.0);
        let retention = stats.accuracy.clamp(0.0, 1.0);

        let breakdown = RewardBreakdown {
            accuracy,
            speed,
            stability,
            retention,
        };

        let score = self.config.accuracy_weight * accuracy
            + self.config.speed_weight * speed
            + self.config.stability_weight * stability
            + self.config.retention_weight * retention;
        let mut value = (2.0 * score - 1.0).clamp(-1.0, 1.0);
        if event.is_quit {
            value = value.min(self.config.quit_floor);
        }

        Reward::new(value, breakdown, now_ms)
    }
}
