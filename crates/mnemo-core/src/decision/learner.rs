//! One surface over the pluggable learners.
//!
//! The engine talks to `Learner` only: select a strategy for one decision,
//! feed a reward back, snapshot for persistence. Which algorithm sits
//! behind that surface is configuration. Snapshots are tagged with their
//! learner kind so a config change never feeds one learner's blob to
//! another.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mnemo_algo::{BanditSnapshot, LinUcbModel, ModelDiagnostics, RefactorPolicy, ThompsonSampler, UpdateOutcome};

use crate::config::{BanditConfig, LearnerKind};
use crate::error::EngineError;
use crate::types::{StrategyParams, UserState};

use super::heuristic::HeuristicLearner;

/// Stored exploration weight for freshly created models. Every decision
/// passes an explicit alpha, so this only matters for stale blobs.
const DEFAULT_MODEL_ALPHA: f64 = 0.3;

/// Everything a learner may need to pick a strategy for one decision.
#[derive(Debug)]
pub struct SelectionContext<'a> {
    pub state: &'a UserState,
    pub current: &'a StrategyParams,
    pub candidates: &'a [StrategyParams],
    /// Context feature vector per candidate, parallel to `candidates`.
    pub features: &'a [Vec<f64>],
    /// Exploration weight for this decision.
    pub alpha: f64,
}

/// A learner's pick plus the numbers behind it.
#[derive(Debug, Clone)]
pub struct Selection {
    pub strategy: StrategyParams,
    /// Index into the candidate list, `None` when the pick bypassed it.
    pub index: Option<usize>,
    pub exploitation: f64,
    pub exploration: f64,
    pub score: f64,
    pub confidence: f64,
}

/// Persisted learner state, tagged with the kind that wrote it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerSnapshot {
    pub kind: LearnerKind,
    pub data: Value,
}

pub enum Learner {
    LinUcb(LinUcbModel),
    Thompson(ThompsonSampler),
    Heuristic(HeuristicLearner),
}

impl Learner {
    pub fn new(kind: LearnerKind, config: &BanditConfig) -> Self {
        match kind {
            LearnerKind::Linucb => Learner::LinUcb(
                LinUcbModel::new(config.dimension, config.lambda, DEFAULT_MODEL_ALPHA)
                    .with_policy(policy_of(config)),
            ),
            LearnerKind::Thompson => Learner::Thompson(ThompsonSampler::default()),
            LearnerKind::Heuristic => Learner::Heuristic(HeuristicLearner::new()),
        }
    }

    /// Restores a learner from its tagged snapshot. A missing, mismatched
    /// or unreadable blob yields a fresh learner; a readable blob with a
    /// different feature dimension goes through model migration.
    pub fn from_snapshot(
        kind: LearnerKind,
        config: &BanditConfig,
        snapshot: Option<LearnerSnapshot>,
    ) -> Self {
        let Some(snapshot) = snapshot else {
            return Learner::new(kind, config);
        };
        if snapshot.kind != kind {
            return Learner::new(kind, config);
        }

        match kind {
            LearnerKind::Linucb => match serde_json::from_value::<BanditSnapshot>(snapshot.data) {
                Ok(blob) => Learner::LinUcb(LinUcbModel::from_snapshot(
                    blob,
                    config.dimension,
                    policy_of(config),
                )),
                Err(_) => Learner::new(kind, config),
            },
            LearnerKind::Thompson => match serde_json::from_value::<ThompsonSampler>(snapshot.data)
            {
                Ok(sampler) => Learner::Thompson(sampler),
                Err(_) => Learner::new(kind, config),
            },
            LearnerKind::Heuristic => Learner::Heuristic(HeuristicLearner::new()),
        }
    }

    pub fn kind(&self) -> LearnerKind {
        match self {
            Learner::LinUcb(_) => LearnerKind::Linucb,
            Learner::Thompson(_) => LearnerKind::Thompson,
            Learner::Heuristic(_) => LearnerKind::Heuristic,
        }
    }

    /// Picks a strategy for one decision. Falls back to the current
    /// strategy when the candidate list is empty.
    pub fn select(&mut self, ctx: &SelectionContext<'_>) -> Selection {
        match self {
            Learner::LinUcb(model) => match model.select(ctx.features, ctx.alpha) {
                Some(outcome) => Selection {
                    strategy: ctx.candidates[outcome.selected_index].clone(),
                    index: Some(outcome.selected_index),
                    exploitation: outcome.exploitation,
                    exploration: outcome.exploration,
                    score: outcome.score,
                    confidence: width_confidence(outcome.exploration),
                },
                None => hold_current(ctx),
            },
            Learner::Thompson(sampler) => {
                let context_key = context_key(ctx.state);
                let action_keys: Vec<String> = ctx.candidates.iter().map(action_key).collect();
                match sampler.select(&context_key, &action_keys) {
                    Some(choice) => {
                        let key = &action_keys[choice.selected_index];
                        Selection {
                            strategy: ctx.candidates[choice.selected_index].clone(),
                            index: Some(choice.selected_index),
                            exploitation: choice.sample,
                            exploration: 0.0,
                            score: choice.sample,
                            confidence: sampler.posterior_mean(key),
                        }
                    }
                    None => hold_current(ctx),
                }
            }
            Learner::Heuristic(heuristic) => Selection {
                strategy: heuristic.suggest(ctx.state, ctx.current),
                index: None,
                exploitation: 0.0,
                exploration: 0.0,
                score: 0.0,
                confidence: heuristic.confidence(ctx.state),
            },
        }
    }

    /// Feeds one observed reward back. Returns the model's update outcome
    /// where the learner has one, so callers can log refactors and resets.
    pub fn observe(
        &mut self,
        features: &[f64],
        context_key: &str,
        action_key: &str,
        reward: f64,
    ) -> Option<UpdateOutcome> {
        match self {
            Learner::LinUcb(model) => Some(model.update(features, reward)),
            Learner::Thompson(sampler) => {
                sampler.update(context_key, action_key, reward > 0.0);
                None
            }
            Learner::Heuristic(_) => None,
        }
    }

    pub fn snapshot(&self) -> Result<LearnerSnapshot, EngineError> {
        let (kind, data) = match self {
            Learner::LinUcb(model) => (
                LearnerKind::Linucb,
                serde_json::to_value(model.snapshot()),
            ),
            Learner::Thompson(sampler) => (LearnerKind::Thompson, serde_json::to_value(sampler)),
            Learner::Heuristic(_) => (LearnerKind::Heuristic, Ok(Value::Null)),
        };
        let data = data.map_err(|e| EngineError::Persistence(e.to_string()))?;
        Ok(LearnerSnapshot { kind, data })
    }

    pub fn diagnose(&self) -> Option<ModelDiagnostics> {
        match self {
            Learner::LinUcb(model) => Some(model.diagnose()),
            _ => None,
        }
    }
}

fn policy_of(config: &BanditConfig) -> RefactorPolicy {
    RefactorPolicy {
        refactor_every: config.refactor_every,
        condition_limit: config.condition_limit,
    }
}

fn hold_current(ctx: &SelectionContext<'_>) -> Selection {
    Selection {
        strategy: ctx.current.clone(),
        index: None,
        exploitation: 0.0,
        exploration: 0.0,
        score: 0.0,
        confidence: 0.3,
    }
}

/// A narrow confidence interval means the model has seen this region
/// often; map the width into (0, 1].
fn width_confidence(exploration: f64) -> f64 {
    1.0 / (1.0 + exploration.max(0.0))
}

/// Coarse state bucket for the contextual posterior table. Three levels
/// per signal keeps the table small while separating the regimes the
/// guardrails care about.
pub fn context_key(state: &UserState) -> String {
    format!(
        "f{}m{}a{}",
        bucket(state.fatigue),
        bucket((state.motivation + 1.0) / 2.0),
        bucket(state.attention)
    )
}

/// Canonical action key: every knob that distinguishes one playable
/// strategy from another.
pub fn action_key(params: &StrategyParams) -> String {
    format!(
        "{}|r{:.1}|b{}|h{}|i{:.1}",
        params.difficulty.as_str(),
        params.new_ratio,
        params.batch_size,
        params.hint_level,
        params.interval_scale
    )
}

fn bucket(value: f64) -> u8 {
    (value.clamp(0.0, 1.0) * 3.0).min(2.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::generate_candidates;
    use mnemo_algo::FEATURE_DIMENSION;

    fn axis_feature(index: usize) -> Vec<f64> {
        let mut x = vec![0.0; FEATURE_DIMENSION];
        x[index] = 1.0;
        x
    }

    fn two_candidates() -> Vec<StrategyParams> {
        vec![
            StrategyParams::default(),
            StrategyParams {
                batch_size: 12,
                ..StrategyParams::default()
            },
        ]
    }

    #[test]
    fn linucb_prefers_the_rewarded_direction() {
        let config = BanditConfig::default();
        let mut learner = Learner::new(LearnerKind::Linucb, &config);
        let good = axis_feature(0);
        let bad = axis_feature(1);
        for _ in 0..30 {
            learner.observe(&good, "", "", 1.0);
            learner.observe(&bad, "", "", -1.0);
        }

        let state = UserState::default();
        let current = StrategyParams::default();
        let candidates = two_candidates();
        let features = vec![good.clone(), bad.clone()];
        let selection = learner.select(&SelectionContext {
            state: &state,
            current: &current,
            candidates: &candidates,
            features: &features,
            alpha: 0.05,
        });
        assert_eq!(selection.index, Some(0));
        assert!(selection.exploitation > 0.5);
    }

    #[test]
    fn linucb_confidence_grows_with_data() {
        let config = BanditConfig::default();
        let mut learner = Learner::new(LearnerKind::Linucb, &config);
        let state = UserState::default();
        let current = StrategyParams::default();
        let candidates = two_candidates();
        let features = vec![axis_feature(0), axis_feature(1)];

        let before = learner
            .select(&SelectionContext {
                state: &state,
                current: &current,
                candidates: &candidates,
                features: &features,
                alpha: 0.5,
            })
            .confidence;
        for _ in 0..50 {
            learner.observe(&axis_feature(0), "", "", 1.0);
            learner.observe(&axis_feature(1), "", "", 0.5);
        }
        let after = learner
            .select(&SelectionContext {
                state: &state,
                current: &current,
                candidates: &candidates,
                features: &features,
                alpha: 0.5,
            })
            .confidence;
        assert!(after > before);
    }

    #[test]
    fn thompson_converges_on_the_rewarded_action() {
        let mut learner =
            Learner::Thompson(ThompsonSampler::default().with_seed(42));
        let state = UserState::default();
        let current = StrategyParams::default();
        let candidates = two_candidates();
        let features = vec![axis_feature(0), axis_feature(1)];

        let ctx_key = context_key(&state);
        let good_key = action_key(&candidates[0]);
        let bad_key = action_key(&candidates[1]);
        for _ in 0..200 {
            learner.observe(&[], &ctx_key, &good_key, 1.0);
            learner.observe(&[], &ctx_key, &bad_key, -1.0);
        }

        let mut wins = 0;
        for _ in 0..100 {
            let selection = learner.select(&SelectionContext {
                state: &state,
                current: &current,
                candidates: &candidates,
                features: &features,
                alpha: 0.2,
            });
            if selection.index == Some(0) {
                wins += 1;
            }
        }
        assert!(wins > 85, "expected dominance, got {}/100", wins);
    }

    #[test]
    fn heuristic_selection_reacts_to_fatigue() {
        let config = BanditConfig::default();
        let mut learner = Learner::new(LearnerKind::Heuristic, &config);
        let mut state = UserState::default();
        state.fatigue = 0.9;
        let current = StrategyParams::default();
        let candidates = generate_candidates(&current, None);
        let features: Vec<Vec<f64>> = candidates
            .iter()
            .map(|_| axis_feature(0))
            .collect();
        let selection = learner.select(&SelectionContext {
            state: &state,
            current: &current,
            candidates: &candidates,
            features: &features,
            alpha: 0.2,
        });
        assert!(selection.strategy.batch_size < current.batch_size);
        assert!(selection.index.is_none());
        assert!(selection.confidence < 1.0);
    }

    #[test]
    fn empty_candidates_hold_the_current_strategy() {
        let config = BanditConfig::default();
        let mut learner = Learner::new(LearnerKind::Linucb, &config);
        let state = UserState::default();
        let current = StrategyParams {
            batch_size: 12,
            ..StrategyParams::default()
        };
        let selection = learner.select(&SelectionContext {
            state: &state,
            current: &current,
            candidates: &[],
            features: &[],
            alpha: 0.2,
        });
        assert_eq!(selection.strategy, current);
        assert!(selection.index.is_none());
    }

    #[test]
    fn snapshot_round_trips_the_model() {
        let config = BanditConfig::default();
        let mut learner = Learner::new(LearnerKind::Linucb, &config);
        for _ in 0..5 {
            learner.observe(&axis_feature(0), "", "", 1.0);
        }
        let snapshot = learner.snapshot().unwrap();
        assert_eq!(snapshot.kind, LearnerKind::Linucb);

        let restored = Learner::from_snapshot(LearnerKind::Linucb, &config, Some(snapshot));
        match restored {
            Learner::LinUcb(model) => {
                assert_eq!(model.d(), config.dimension);
                assert_eq!(model.update_count(), 5);
            }
            _ => panic!("expected a restored linucb model"),
        }
    }

    #[test]
    fn mismatched_snapshot_kind_yields_a_fresh_learner() {
        let config = BanditConfig::default();
        let mut thompson = Learner::new(LearnerKind::Thompson, &config);
        thompson.observe(&[], "ctx", "a", 1.0);
        let snapshot = thompson.snapshot().unwrap();

        let restored = Learner::from_snapshot(LearnerKind::Linucb, &config, Some(snapshot));
        match restored {
            Learner::LinUcb(model) => assert_eq!(model.update_count(), 0),
            _ => panic!("expected a fresh linucb model"),
        }
    }

    #[test]
    fn old_dimension_snapshot_migrates_on_restore() {
        let config = BanditConfig::default();
        let mut old = LinUcbModel::new(12, 1.0, 0.3);
        for _ in 0..5 {
            old.update(&vec![1.0; 12], 1.0);
        }
        let snapshot = LearnerSnapshot {
            kind: LearnerKind::Linucb,
            data: serde_json::to_value(old.snapshot()).unwrap(),
        };

        let restored = Learner::from_snapshot(LearnerKind::Linucb, &config, Some(snapshot));
        match restored {
            Learner::LinUcb(model) => {
                assert_eq!(model.d(), FEATURE_DIMENSION);
                assert_eq!(model.update_count(), 5);
            }
            _ => panic!("expected a migrated linucb model"),
        }
    }

    #[test]
    fn context_key_buckets_the_state_coarsely() {
        let calm = UserState::default();
        let mut nearby = UserState::default();
        nearby.attention += 0.02;
        assert_eq!(context_key(&calm), context_key(&nearby));

        let mut stressed = UserState::default();
        stressed.fatigue = 0.95;
        stressed.motivation = -0.9;
        assert_ne!(context_key(&calm), context_key(&stressed));
    }

    #[test]
    fn action_keys_distinguish_every_knob() {
        let a = StrategyParams::default();
        let mut b = a.clone();
        b.hint_level = 2;
        assert_ne!(action_key(&a), action_key(&b));
        let mut c = a.clone();
        c.interval_scale = 1.2;
        assert_ne!(action_key(&a), action_key(&c));
    }
}
