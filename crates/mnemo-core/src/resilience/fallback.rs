//! Fallback ladder for degraded paths.
//!
//! Whatever broke, the caller still gets a complete result: the user's
//! last known good strategy when one is available, a heuristic suggestion
//! from whatever state survives, or the safe default. Guardrails run over
//! the picked strategy whenever state is available, so a degraded answer
//! is never an unsafe one.

use crate::decision::HeuristicLearner;
use crate::error::FallbackReason;
use crate::strategy::DecisionMapper;
use crate::types::{
    Action, ColdStartPhase, DecisionExplanation, ProcessResult, Reward, RewardBreakdown,
    StrategyParams, UserState,
};

const EXTREME_FATIGUE: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct FallbackLadder {
    mapper: DecisionMapper,
    heuristic: HeuristicLearner,
}

impl FallbackLadder {
    pub fn new(mapper: DecisionMapper) -> Self {
        Self {
            mapper,
            heuristic: HeuristicLearner::new(),
        }
    }

    /// Builds the degraded result for one failed invocation.
    pub fn build(
        &self,
        reason: FallbackReason,
        last_known_good: Option<&StrategyParams>,
        state: Option<&UserState>,
        phase: Option<ColdStartPhase>,
        now_ms: i64,
        latency_ms: u64,
    ) -> ProcessResult {
        let (mut strategy, rung) = match (last_known_good, state) {
            (Some(params), _) => (params.clone(), "last known good strategy"),
            (None, Some(state)) => (
                self.heuristic.suggest(state, &StrategyParams::default()),
                "heuristic strategy",
            ),
            (None, None) => (StrategyParams::default(), "default strategy"),
        };

        let mut factors = Vec::new();
        let mut should_break = false;
        let mut suggestion = None;
        if let Some(state) = state {
            let (guarded, guard_factors, breaking) = self.mapper.guard(strategy, state);
            strategy = guarded;
            factors = guard_factors;
            should_break = breaking;
            if state.fatigue > EXTREME_FATIGUE {
                should_break = true;
                suggestion = Some("take a break before continuing".to_string());
            }
        }

        let state = state.cloned().unwrap_or_default();
        let summary = format!("degraded: served {} ({})", rung, reason.as_str());

        ProcessResult {
            state,
            action: Action::from(strategy.clone()),
            strategy,
            reward: Reward::new(0.0, RewardBreakdown::default(), now_ms),
            explanation: DecisionExplanation {
                factors,
                changes: Vec::new(),
                summary,
            },
            feature_vector: None,
            phase,
            should_break,
            suggestion,
            degraded: true,
            fallback_reason: Some(reason),
            latency_ms,
        }
    }
}

impl Default for FallbackLadder {
    fn default() -> Self {
        Self::new(DecisionMapper::default())
    }
}
