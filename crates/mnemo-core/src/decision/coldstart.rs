//! Cold-start phasing and per-phase exploration control.
//!
//! The phase is a pure function of how many interactions the user has
//! accumulated: the first events classify the user into a coarse type, a
//! middle stretch explores with a widened exploration weight, and from then
//! on the bandit runs normally. Classification evidence keeps accruing
//! per event so a user who re-enters the classify window after a state
//! reset picks up where the evidence left off.

use serde::{Deserialize, Serialize};

use crate::config::ColdStartConfig;
use crate::types::{ColdStartPhase, ColdStartState, StrategyParams, UserType};

/// What the cold-start layer tells the decision pipeline for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColdStartDecision {
    pub phase: ColdStartPhase,
    /// Exploration weight the bandit should use for this decision.
    pub alpha: f64,
    /// During classification the strategy is pinned to a safe preset and
    /// the learner is not consulted.
    pub pinned: Option<StrategyParams>,
}

#[derive(Debug, Clone)]
pub struct ColdStartManager {
    config: ColdStartConfig,
    state: ColdStartState,
}

impl ColdStartManager {
    pub fn new(config: ColdStartConfig) -> Self {
        Self {
            config,
            state: ColdStartState::default(),
        }
    }

    pub fn from_state(config: ColdStartConfig, state: ColdStartState) -> Self {
        Self { config, state }
    }

    pub fn state(&self) -> &ColdStartState {
        &self.state
    }

    pub fn into_state(self) -> ColdStartState {
        self.state
    }

    pub fn phase(&self) -> ColdStartPhase {
        self.state.phase
    }

    pub fn user_type(&self) -> Option<UserType> {
        self.state.user_type
    }

    /// Runs the phase logic for one event and returns the exploration
    /// weight plus, during classification, the pinned strategy.
    ///
    /// `accuracy` and `response_time_ms` describe the recent behavior
    /// window; `accuracy_spread` is the gap between the older and newer
    /// halves of that window and flags unstable performance.
    pub fn assess(
        &mut self,
        interaction_count: u64,
        accuracy: f64,
        response_time_ms: f64,
        fatigue: f64,
        accuracy_spread: f64,
    ) -> ColdStartDecision {
        let phase = self.config.phase_for(interaction_count);
        self.state.phase = phase;

        match phase {
            ColdStartPhase::Classify => {
                self.observe(accuracy, response_time_ms);
                let provisional = self.leading_type().unwrap_or_default();
                self.state.user_type = Some(provisional);
                ColdStartDecision {
                    phase,
                    alpha: self.config.classify_alpha,
                    pinned: Some(StrategyParams::for_user_type(provisional)),
                }
            }
            ColdStartPhase::Explore => {
                self.settle();
                ColdStartDecision {
                    phase,
                    alpha: self.explore_alpha(fatigue, accuracy_spread),
                    pinned: None,
                }
            }
            ColdStartPhase::Normal => {
                self.settle();
                ColdStartDecision {
                    phase,
                    alpha: self.config.normal_alpha,
                    pinned: None,
                }
            }
        }
    }

    /// Accumulates classification evidence from one event. Scores are
    /// soft so a single outlier does not flip the type.
    fn observe(&mut self, accuracy: f64, response_time_ms: f64) {
        let scores = &mut self.state.classification_scores;
        if response_time_ms < 2000.0 && accuracy > 0.8 {
            scores[0] += 1.0;
        }
        if (0.6..=0.85).contains(&accuracy) {
            scores[1] += 1.0;
        }
        if response_time_ms > 4000.0 || accuracy < 0.6 {
            scores[2] += 1.0;
        }
    }

    fn leading_type(&self) -> Option<UserType> {
        let scores = &self.state.classification_scores;
        let total: f64 = scores.iter().sum();
        if total <= 0.0 {
            return None;
        }
        let mut best = 0;
        for (i, score) in scores.iter().enumerate() {
            if *score > scores[best] {
                best = i;
            }
        }
        Some(match best {
            0 => UserType::Fast,
            2 => UserType::Cautious,
            _ => UserType::Stable,
        })
    }

    /// Locks in the user type and its base strategy when classification
    /// ends. Idempotent after the first call.
    fn settle(&mut self) {
        if self.state.settled_strategy.is_some() {
            return;
        }
        let settled = self
            .state
            .user_type
            .or_else(|| self.leading_type())
            .unwrap_or_default();
        self.state.user_type = Some(settled);
        self.state.settled_strategy = Some(StrategyParams::for_user_type(settled));
    }

    /// Exploration shrinks as fatigue rises and is capped outright while
    /// recent accuracy swings wide.
    fn explore_alpha(&self, fatigue: f64, accuracy_spread: f64) -> f64 {
        let mut alpha = self.config.explore_alpha * (1.0 - 0.5 * fatigue.clamp(0.0, 1.0));
        if accuracy_spread > self.config.accuracy_instability {
            alpha = alpha.min(self.config.explore_alpha_unstable_cap);
        }
        alpha.max(self.config.normal_alpha)
    }
}
