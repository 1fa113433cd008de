//! Event processing engine.
//!
//! One call per behavior event: validate, update the latent state, pick a
//! strategy, shape the reward, queue its delayed counterpart and persist.
//! The pipeline runs behind a per-user lock with a hard timeout and a
//! circuit breaker in front; whatever fails inside, the caller still gets
//! a complete [`ProcessResult`] from the fallback ladder.
//!
//! Cached per-user entries are taken out of the maps for the duration of a
//! pipeline run and only put back on success, so a cancelled run drops its
//! in-flight work and the next event reloads from the repositories. The
//! repositories are the source of truth; the caches are an optimization.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use mnemo_algo::UpdateOutcome;

use crate::config::EngineConfig;
use crate::decision::{
    action_key, context_key, generate_candidates, ColdStartManager, Learner, Selection,
    SelectionContext,
};
use crate::error::{EngineError, FallbackReason};
use crate::features::{BehaviorSignals, EventWindow, FeatureBuilder};
use crate::persistence::{
    FeatureStore, InMemoryFeatureStore, InMemoryModelRepository, InMemoryRewardQueue,
    InMemoryStateRepository, ModelRepository, RewardQueueEntry, RewardQueueStore, StateRepository,
};
use crate::modeling::{
    AttentionMonitor, CognitiveProfiler, FatigueEstimator, FatigueInputs, HabitRecognizer,
    MotivationSignal, MotivationTracker, TrendAnalyzer,
};
use crate::reconcile::RewardPayload;
use crate::resilience::{
    CircuitBreaker, CircuitState, FallbackLadder, InProcessLocks, LockProvider,
};
use crate::reward::RewardShaper;
use crate::strategy::{DecisionMapper, StrategyDecision};
use crate::telemetry::{EngineTelemetry, InvariantMonitor};
use crate::types::{
    Action, ColdStartPhase, DecisionExplanation, ProcessResult, RawEvent, StrategyParams,
    UserRecord, UserState, FEATURE_SCHEMA_VERSION,
};

/// Gaps shorter than this pass through without any cross-session decay.
const MEDIUM_GAP_MINUTES: f64 = 5.0;
/// Attention settles halfway toward this after a long break.
const BASELINE_ATTENTION: f64 = 0.7;
/// Inertia of the confidence blend; the remainder weighs window fill.
const CONFIDENCE_BETA: f64 = 0.9;

const BREAK_SUGGESTION: &str = "take a break before continuing";
const REFRESH_SUGGESTION: &str = "switch to a short refresh session to rebuild momentum";

/// Repository bundle the engine runs against. All handles are shared, so
/// the reconciler can be wired onto the same stores.
#[derive(Clone)]
pub struct EngineStores {
    pub states: Arc<dyn StateRepository>,
    pub models: Arc<dyn ModelRepository>,
    pub features: Arc<dyn FeatureStore>,
    pub rewards: Arc<dyn RewardQueueStore>,
}

impl EngineStores {
    pub fn in_memory() -> Self {
        Self {
            states: Arc::new(InMemoryStateRepository::default()),
            models: Arc::new(InMemoryModelRepository::default()),
            features: Arc::new(InMemoryFeatureStore::default()),
            rewards: Arc::new(InMemoryRewardQueue::default()),
        }
    }
}

/// Cache occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub records: usize,
    pub runtimes: usize,
}

/// Everything the pipeline keeps warm for one user between events: the
/// sliding window, the estimators and the learner. Rebuilt from the
/// persisted record and model snapshot on a cache miss.
struct UserRuntime {
    window: EventWindow,
    attention: AttentionMonitor,
    fatigue: FatigueEstimator,
    cognitive: CognitiveProfiler,
    motivation: MotivationTracker,
    trend: TrendAnalyzer,
    habit: HabitRecognizer,
    learner: Learner,
}

struct Cached<T> {
    value: T,
    touched_ms: i64,
}

pub struct AdaptiveEngine {
    config: EngineConfig,
    builder: FeatureBuilder,
    mapper: DecisionMapper,
    shaper: RewardShaper,
    fallback: FallbackLadder,
    breaker: CircuitBreaker,
    locks: Arc<dyn LockProvider>,
    stores: EngineStores,
    records: Mutex<HashMap<String, Cached<UserRecord>>>,
    runtimes: Mutex<HashMap<String, Cached<UserRuntime>>>,
    telemetry: Arc<EngineTelemetry>,
    monitor: InvariantMonitor,
}

impl AdaptiveEngine {
    pub fn new(config: EngineConfig, stores: EngineStores) -> Self {
        let builder = FeatureBuilder::new(config.feature.clone());
        let mapper = DecisionMapper::new(config.strategy.clone());
        let shaper = RewardShaper::new(config.reward.clone());
        let fallback = FallbackLadder::new(mapper.clone());
        let breaker = CircuitBreaker::new(config.resilience.breaker.clone());
        Self {
            builder,
            mapper,
            shaper,
            fallback,
            breaker,
            locks: Arc::new(InProcessLocks::default()),
            stores,
            records: Mutex::new(HashMap::new()),
            runtimes: Mutex::new(HashMap::new()),
            telemetry: Arc::new(EngineTelemetry::default()),
            monitor: InvariantMonitor::new(),
            config,
        }
    }

    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(config, EngineStores::in_memory())
    }

    /// Swaps the per-user lock provider, e.g. for a distributed registry.
    pub fn with_lock_provider(mut self, locks: Arc<dyn LockProvider>) -> Self {
        self.locks = locks;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stores(&self) -> EngineStores {
        self.stores.clone()
    }

    pub fn lock_provider(&self) -> Arc<dyn LockProvider> {
        self.locks.clone()
    }

    pub fn telemetry(&self) -> Arc<EngineTelemetry> {
        self.telemetry.clone()
    }

    /// Processes one behavior event end to end. Never returns an error:
    /// anything that fails inside degrades to the fallback ladder and is
    /// reported through `degraded` and `fallback_reason` on the result.
    pub async fn process(&self, event: RawEvent) -> ProcessResult {
        let started = Instant::now();

        if let Err(err) = event.validate() {
            warn!(user_id = %event.user_id, error = %err, "rejected event");
            let result = self
                .degrade(&event.user_id, FallbackReason::from(&err), started)
                .await;
            self.monitor.observe(&event.user_id, &result);
            return result;
        }

        let (admitted, transition) = self.breaker.try_acquire(Utc::now().timestamp_millis());
        self.note_breaker(transition);
        if !admitted {
            let result = self
                .degrade(&event.user_id, FallbackReason::CircuitOpen, started)
                .await;
            self.monitor.observe(&event.user_id, &result);
            return result;
        }

        let lock = self.locks.user_lock(&event.user_id).await;
        let _guard = lock.lock().await;

        let budget = Duration::from_millis(self.config.resilience.timeout_ms);
        let result = match timeout(budget, self.run_pipeline(&event, started)).await {
            Ok(Ok(result)) => {
                let transition = self.breaker.record(true, Utc::now().timestamp_millis());
                self.note_breaker(transition);
                self.telemetry
                    .record_decision(started.elapsed().as_micros() as u64);
                result
            }
            Ok(Err(err)) => {
                warn!(user_id = %event.user_id, error = %err, "pipeline failed");
                let transition = self.breaker.record(false, Utc::now().timestamp_millis());
                self.note_breaker(transition);
                self.degrade(&event.user_id, FallbackReason::from(&err), started)
                    .await
            }
            Err(_) => {
                warn!(
                    user_id = %event.user_id,
                    budget_ms = self.config.resilience.timeout_ms,
                    "pipeline timed out"
                );
                let transition = self.breaker.record(false, Utc::now().timestamp_millis());
                self.note_breaker(transition);
                self.degrade(&event.user_id, FallbackReason::Timeout, started)
                    .await
            }
        };

        self.monitor.observe(&event.user_id, &result);
        result
    }

    /// Last computed state for a user, from cache or the repository.
    pub async fn user_state(&self, user_id: &str) -> Result<Option<UserState>, EngineError> {
        if let Some(cached) = self.records.lock().get(user_id) {
            return Ok(Some(cached.value.state.clone()));
        }
        Ok(self.stores.states.load(user_id).await?.map(|r| r.state))
    }

    /// Strategy the user would be served right now.
    pub async fn current_strategy(
        &self,
        user_id: &str,
    ) -> Result<Option<StrategyParams>, EngineError> {
        if let Some(cached) = self.records.lock().get(user_id) {
            return Ok(Some(cached.value.strategy.clone()));
        }
        Ok(self.stores.states.load(user_id).await?.map(|r| r.strategy))
    }

    /// Drops the user's cached record and runtime so the next event
    /// reloads from the repositories.
    pub fn invalidate(&self, user_id: &str) {
        self.records.lock().remove(user_id);
        self.runtimes.lock().remove(user_id);
    }

    /// Evicts cache entries not touched within the configured stale window
    /// and returns how many users were dropped. Persisted state is
    /// untouched; the next event for an evicted user reloads it.
    pub fn cleanup_stale(&self, now_ms: i64) -> usize {
        let cutoff =
            now_ms.saturating_sub((self.config.cache.stale_after_secs as i64).saturating_mul(1000));
        let evicted = {
            let mut records = self.records.lock();
            let before = records.len();
            records.retain(|_, cached| cached.touched_ms >= cutoff);
            before - records.len()
        };
        self.runtimes
            .lock()
            .retain(|_, cached| cached.touched_ms >= cutoff);
        if evicted > 0 {
            info!(evicted, "evicted stale cached users");
        }
        evicted
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            records: self.records.lock().len(),
            runtimes: self.runtimes.lock().len(),
        }
    }

    async fn run_pipeline(
        &self,
        event: &RawEvent,
        started: Instant,
    ) -> Result<ProcessResult, EngineError> {
        let now_ms = event.timestamp_ms;
        let (mut record, decayed_on_load) = self.take_record(&event.user_id, now_ms).await;
        let mut runtime = self.take_runtime(&event.user_id, &record).await;

        // Inter-event gap for the fatigue break path. A gap the load decay
        // already consumed is not applied a second time.
        let gap_minutes = if decayed_on_load || record.interaction_count == 0 {
            None
        } else {
            let minutes = (now_ms - record.state.updated_at_ms) as f64 / 60_000.0;
            (minutes > 0.0).then_some(minutes)
        };

        runtime.window.push(event);
        let stats = runtime.window.stats();
        let spread = runtime.window.accuracy_spread();
        let signals = BehaviorSignals::extract(event, &stats, self.builder.config());

        let attention = runtime.attention.update(&signals);
        let fatigue = runtime.fatigue.update(FatigueInputs {
            error_rate_delta: (1.0 - stats.accuracy - 0.3).max(0.0),
            rt_increase: stats.drift,
            repeat_count: event.retry_count,
            break_minutes: gap_minutes,
        });
        let motivation = runtime.motivation.update(MotivationSignal {
            is_correct: event.is_correct,
            is_quit: event.is_quit,
        });
        let cognitive = runtime.cognitive.update(stats.accuracy, event.response_time_ms);
        let trend = if self.config.flags.trend_enabled {
            Some(runtime.trend.update(now_ms, stats.accuracy).direction)
        } else {
            record.state.trend
        };
        let habit = if self.config.flags.habit_enabled {
            runtime.habit.observe_event(now_ms);
            if let Some(duration_ms) = event.session_duration_ms {
                runtime
                    .habit
                    .observe_session(duration_ms as f64 / 60_000.0, record.strategy.batch_size);
            }
            Some(runtime.habit.profile())
        } else {
            record.state.habit.clone()
        };

        // Confidence tracks how much of the window is backed by evidence.
        let window_fill =
            (stats.count as f64 / self.config.feature.window_capacity as f64).min(1.0);
        let confidence = (CONFIDENCE_BETA * record.state.confidence
            + (1.0 - CONFIDENCE_BETA) * window_fill)
            .clamp(0.0, 1.0);

        let state = UserState {
            attention,
            fatigue,
            cognitive,
            motivation,
            habit,
            trend,
            confidence,
            updated_at_ms: now_ms,
        };

        let mut cold_start = ColdStartManager::from_state(
            self.config.cold_start.clone(),
            record.cold_start.clone(),
        );
        let cold = cold_start.assess(
            record.interaction_count,
            stats.accuracy,
            stats.mean_rt_ms,
            state.fatigue,
            spread,
        );

        let current = record.strategy.clone();
        let (target, selection) = match &cold.pinned {
            Some(pinned) => (pinned.clone(), None),
            None => {
                let candidates = generate_candidates(&current, state.habit.as_ref());
                let features: Vec<Vec<f64>> = candidates
                    .iter()
                    .map(|candidate| {
                        self.builder
                            .build(&state, candidate, &stats, record.interaction_count, now_ms)
                            .values
                    })
                    .collect();
                let selection = runtime.learner.select(&SelectionContext {
                    state: &state,
                    current: &current,
                    candidates: &candidates,
                    features: &features,
                    alpha: cold.alpha,
                });
                (selection.strategy.clone(), Some(selection))
            }
        };

        let decision = self.mapper.decide(&current, &target, &state);
        let reward = self.shaper.shape(event, &stats, now_ms);

        // The model learns on the strategy that was actually served, after
        // smoothing and guardrails, not on the raw pick.
        let served = self
            .builder
            .build(&state, &decision.params, &stats, record.interaction_count, now_ms);
        if cold.pinned.is_none() {
            let ctx_key = context_key(&state);
            let act_key = action_key(&decision.params);
            match runtime
                .learner
                .observe(&served.values, &ctx_key, &act_key, reward.value)
            {
                Some(UpdateOutcome::Refactored) => self.telemetry.record_model_refactor(),
                Some(UpdateOutcome::Reset) => {
                    self.telemetry.record_model_reset();
                    warn!(
                        user_id = %event.user_id,
                        error = %EngineError::NumericInstability,
                        "model reset during update"
                    );
                }
                _ => {}
            }
        }

        if self.config.flags.delayed_reward_enabled {
            self.enqueue_delayed_reward(event, &state, &decision.params, &served.values, reward.value)
                .await?;
        }

        record.state = state;
        record.strategy = decision.params.clone();
        record.cold_start = cold_start.into_state();
        record.interaction_count += 1;
        record.last_updated_ms = now_ms;

        let snapshot = runtime.learner.snapshot()?;
        self.stores.models.save(&event.user_id, &snapshot).await?;
        self.stores.states.save(&record).await?;

        let explanation = build_explanation(&decision, selection.as_ref(), cold.phase);
        let suggestion = if decision.should_break {
            Some(BREAK_SUGGESTION.to_string())
        } else if runtime.motivation.long_term_low() {
            Some(REFRESH_SUGGESTION.to_string())
        } else {
            None
        };

        let result = ProcessResult {
            state: record.state.clone(),
            strategy: record.strategy.clone(),
            action: Action::from(target),
            reward,
            explanation,
            feature_vector: Some(served),
            phase: Some(cold.phase),
            should_break: decision.should_break,
            suggestion,
            degraded: false,
            fallback_reason: None,
            latency_ms: started.elapsed().as_millis() as u64,
        };

        self.store_caches(&event.user_id, record, runtime);
        Ok(result)
    }

    /// Serializes the replay context and enqueues the delayed-reward row.
    /// A repeated event id hits the idempotency key and counts nothing.
    async fn enqueue_delayed_reward(
        &self,
        event: &RawEvent,
        state: &UserState,
        served: &StrategyParams,
        features: &[f64],
        reward_value: f64,
    ) -> Result<(), EngineError> {
        let payload = RewardPayload {
            features: features.to_vec(),
            context_key: context_key(state),
            action_key: action_key(served),
            schema_version: FEATURE_SCHEMA_VERSION,
        };
        let blob =
            serde_json::to_vec(&payload).map_err(|e| EngineError::Persistence(e.to_string()))?;
        self.stores.features.put(&event.event_id, blob).await?;

        let due_at_ms = event.timestamp_ms + self.config.reconciler.default_delay_ms;
        let entry = RewardQueueEntry::new(
            &event.user_id,
            &event.event_id,
            reward_value,
            due_at_ms,
            event.timestamp_ms,
        );
        let submitted_id = entry.id.clone();
        let stored = self.stores.rewards.enqueue(entry).await?;
        if stored.id == submitted_id {
            self.telemetry.record_reward_enqueued();
        }
        Ok(())
    }

    /// Pulls the user's record out of the cache, or loads it from the
    /// repository and applies cross-session decay. The caller owns the
    /// record until `store_caches` puts it back. A failed read falls back
    /// to a fresh record; only writes propagate.
    async fn take_record(&self, user_id: &str, now_ms: i64) -> (UserRecord, bool) {
        if let Some(cached) = self.records.lock().remove(user_id) {
            return (cached.value, false);
        }
        match self.stores.states.load(user_id).await {
            Ok(Some(mut record)) => {
                let decayed = self.decay_after_gap(&mut record.state, now_ms);
                if decayed {
                    debug!(user_id, "state decayed after session gap");
                }
                (record, decayed)
            }
            Ok(None) => (UserRecord::new(user_id, now_ms), false),
            Err(err) => {
                warn!(user_id, error = %err, "state load failed; starting from defaults");
                (UserRecord::new(user_id, now_ms), false)
            }
        }
    }

    async fn take_runtime(&self, user_id: &str, record: &UserRecord) -> UserRuntime {
        if let Some(cached) = self.runtimes.lock().remove(user_id) {
            let mut runtime = cached.value;
            sync_runtime(&mut runtime, &record.state);
            return runtime;
        }

        let snapshot = match self.stores.models.load(user_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(user_id, error = %err, "model load failed; starting fresh");
                None
            }
        };
        let learner = Learner::from_snapshot(self.config.learner, &self.config.bandit, snapshot);
        let mut runtime = UserRuntime {
            window: self.builder.window(),
            attention: AttentionMonitor::new(self.config.attention.clone()),
            fatigue: FatigueEstimator::new(self.config.fatigue.clone()),
            cognitive: CognitiveProfiler::new(self.config.cognitive.clone()),
            motivation: MotivationTracker::new(self.config.motivation.clone()),
            trend: TrendAnalyzer::new(self.config.trend.clone()),
            habit: match record.state.habit.as_ref() {
                Some(profile) => HabitRecognizer::from_profile(self.config.habit.clone(), profile),
                None => HabitRecognizer::new(self.config.habit.clone()),
            },
            learner,
        };
        sync_runtime(&mut runtime, &record.state);
        runtime
    }

    /// Cross-session decay applied when a persisted state is loaded. A
    /// long gap resets fatigue and settles attention toward its baseline;
    /// a medium gap decays fatigue exponentially.
    fn decay_after_gap(&self, state: &mut UserState, now_ms: i64) -> bool {
        let minutes = (now_ms - state.updated_at_ms) as f64 / 60_000.0;
        if minutes >= self.config.fatigue.long_break_minutes {
            state.fatigue = self.config.fatigue.reset_value;
            state.attention = 0.5 * (state.attention + BASELINE_ATTENTION);
            true
        } else if minutes > MEDIUM_GAP_MINUTES {
            state.fatigue *= (-self.config.fatigue.decay_k * minutes).exp();
            true
        } else {
            false
        }
    }

    fn store_caches(&self, user_id: &str, record: UserRecord, runtime: UserRuntime) {
        let touched_ms = Utc::now().timestamp_millis();
        self.evict_if_full();
        self.records.lock().insert(
            user_id.to_string(),
            Cached {
                value: record,
                touched_ms,
            },
        );
        self.runtimes.lock().insert(
            user_id.to_string(),
            Cached {
                value: runtime,
                touched_ms,
            },
        );
    }

    /// Bounded-map eviction: when the cache is full the least recently
    /// touched user makes room for the incoming one.
    fn evict_if_full(&self) {
        let mut records = self.records.lock();
        if records.len() < self.config.cache.max_users {
            return;
        }
        let oldest = records
            .iter()
            .min_by_key(|(_, cached)| cached.touched_ms)
            .map(|(user_id, _)| user_id.clone());
        if let Some(user_id) = oldest {
            records.remove(&user_id);
            drop(records);
            self.runtimes.lock().remove(&user_id);
            debug!(user_id = %user_id, "evicted least recently used cache entry");
        }
    }

    /// Builds the degraded result for one failed or rejected invocation.
    async fn degrade(
        &self,
        user_id: &str,
        reason: FallbackReason,
        started: Instant,
    ) -> ProcessResult {
        self.telemetry.record_fallback(reason);
        let record = self.peek_record(user_id).await;
        let now_ms = Utc::now().timestamp_millis();
        let latency_ms = started.elapsed().as_millis() as u64;
        match record {
            Some(record) => self.fallback.build(
                reason,
                Some(&record.strategy),
                Some(&record.state),
                Some(record.cold_start.phase),
                now_ms,
                latency_ms,
            ),
            None => self.fallback.build(reason, None, None, None, now_ms, latency_ms),
        }
    }

    async fn peek_record(&self, user_id: &str) -> Option<UserRecord> {
        if let Some(cached) = self.records.lock().get(user_id) {
            return Some(cached.value.clone());
        }
        self.stores.states.load(user_id).await.ok().flatten()
    }

    fn note_breaker(&self, transition: Option<CircuitState>) {
        match transition {
            Some(CircuitState::Open) => {
                self.telemetry.record_breaker_opened();
                warn!("circuit breaker opened");
            }
            Some(CircuitState::HalfOpen) => {
                self.telemetry.record_breaker_half_opened();
                info!("circuit breaker half-open, probing");
            }
            Some(CircuitState::Closed) => {
                self.telemetry.record_breaker_closed();
                info!("circuit breaker closed");
            }
            None => {}
        }
    }
}

/// Re-seeds the estimators from the persisted scalars so a rebuilt or
/// cached runtime continues from the stored state rather than from
/// defaults.
fn sync_runtime(runtime: &mut UserRuntime, state: &UserState) {
    runtime.attention.set_value(state.attention);
    runtime.fatigue.set_value(state.fatigue);
    runtime.motivation.set_value(state.motivation);
    runtime.cognitive.set_profile(state.cognitive.clone());
}

fn build_explanation(
    decision: &StrategyDecision,
    selection: Option<&Selection>,
    phase: ColdStartPhase,
) -> DecisionExplanation {
    let summary = if phase == ColdStartPhase::Classify {
        "classifying: strategy pinned to the provisional user type".to_string()
    } else if !decision.factors.is_empty() {
        let names: Vec<&str> = decision.factors.iter().map(|f| f.name.as_str()).collect();
        format!("guardrails tightened for {}", names.join(", "))
    } else if decision.changes.is_empty() {
        "state healthy; strategy held".to_string()
    } else if let Some(selection) = selection {
        format!("learner pick applied (confidence {:.2})", selection.confidence)
    } else {
        "strategy adjusted".to_string()
    };

    DecisionExplanation {
        factors: decision.factors.clone(),
        changes: decision.changes.clone(),
        summary,
    }
}
