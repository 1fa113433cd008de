//! Delayed-reward reconciliation.
//!
//! Immediate rewards train the model inline; the delayed counterpart is
//! queued at decision time and replayed here once its due time passes. A
//! sweep recovers rows a crashed worker left PROCESSING, claims what is
//! due, replays each entry through the learner under the user's lock and
//! persists the model. Failures back off linearly and park the row FAILED
//! once the attempt budget is spent.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{BanditConfig, LearnerKind, ReconcilerConfig};
use crate::decision::Learner;
use crate::engine::{AdaptiveEngine, EngineStores};
use crate::error::EngineError;
use crate::persistence::{
    FeatureStore, ModelRepository, RewardQueueEntry, RewardQueueStatus, RewardQueueStore,
};
use crate::resilience::LockProvider;
use crate::telemetry::EngineTelemetry;
use crate::types::FEATURE_SCHEMA_VERSION;

/// Replay context stored alongside a queued reward, as an opaque blob
/// keyed by event id. Carries the schema version so a blob written before
/// a feature-dimension change is refused instead of silently ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardPayload {
    pub features: Vec<f64>,
    pub context_key: String,
    pub action_key: String,
    pub schema_version: u32,
}

/// What one sweep did, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub recovered: u64,
    pub claimed: usize,
    pub replayed: usize,
    pub failed: usize,
}

pub struct Reconciler {
    engine: Arc<AdaptiveEngine>,
    learner: LearnerKind,
    bandit: BanditConfig,
    config: ReconcilerConfig,
    stores: EngineStores,
    locks: Arc<dyn LockProvider>,
    telemetry: Arc<EngineTelemetry>,
}

impl Reconciler {
    /// Wires a reconciler onto the engine's stores, locks and telemetry so
    /// both sides replay into the same models under the same user locks.
    pub fn new(engine: Arc<AdaptiveEngine>) -> Self {
        let config = engine.config();
        Self {
            learner: config.learner,
            bandit: config.bandit.clone(),
            config: config.reconciler.clone(),
            stores: engine.stores(),
            locks: engine.lock_provider(),
            telemetry: engine.telemetry(),
            engine,
        }
    }

    pub fn sweep_interval_secs(&self) -> u64 {
        self.config.sweep_interval_secs
    }

    /// Convenience entry point for the cron job.
    pub async fn sweep_now(&self) -> Result<SweepStats, EngineError> {
        self.sweep(Utc::now().timestamp_millis()).await
    }

    /// One reconciliation pass: recover, claim, replay.
    pub async fn sweep(&self, now_ms: i64) -> Result<SweepStats, EngineError> {
        let recovered = self
            .stores
            .rewards
            .recover_stuck(now_ms - self.config.visibility_timeout_ms, now_ms)
            .await?;
        if recovered > 0 {
            warn!(recovered, "recovered stuck reward rows back to pending");
        }

        let claimed = self
            .stores
            .rewards
            .claim_due(now_ms, self.config.batch_size)
            .await?;
        let mut stats = SweepStats {
            recovered,
            claimed: claimed.len(),
            ..SweepStats::default()
        };

        for mut entry in claimed {
            match self.replay(&entry).await {
                Ok(()) => {
                    entry.status = RewardQueueStatus::Done;
                    entry.last_error = None;
                    entry.updated_at_ms = now_ms;
                    self.stores.rewards.update_status(&entry).await?;
                    self.telemetry.record_reward_replayed();
                    stats.replayed += 1;
                }
                Err(err) => {
                    entry.attempt_count += 1;
                    let detail = format!(
                        "Retry {}/{}: {}",
                        entry.attempt_count, self.config.max_attempts, err
                    );
                    if entry.attempt_count >= self.config.max_attempts {
                        entry.status = RewardQueueStatus::Failed;
                        warn!(
                            entry_id = %entry.id,
                            user_id = %entry.user_id,
                            error = %err,
                            "delayed reward failed permanently"
                        );
                    } else {
                        entry.status = RewardQueueStatus::Pending;
                        entry.due_at_ms =
                            now_ms + entry.attempt_count as i64 * self.config.base_backoff_ms;
                        debug!(
                            entry_id = %entry.id,
                            attempt = entry.attempt_count,
                            due_at_ms = entry.due_at_ms,
                            "delayed reward retry scheduled"
                        );
                    }
                    entry.last_error = Some(detail);
                    entry.updated_at_ms = now_ms;
                    self.stores.rewards.update_status(&entry).await?;
                    self.telemetry.record_reward_failed();
                    stats.failed += 1;
                }
            }
        }

        if stats.claimed > 0 {
            info!(
                claimed = stats.claimed,
                replayed = stats.replayed,
                failed = stats.failed,
                "reconciler sweep finished"
            );
        }
        Ok(stats)
    }

    /// Replays one entry into the user's model. The schema check is
    /// explicit: the model silently skips mismatched dimensions, and a
    /// replay that trains nothing must surface as a row failure instead.
    async fn replay(&self, entry: &RewardQueueEntry) -> Result<(), EngineError> {
        let blob = self
            .stores
            .features
            .get(&entry.event_id)
            .await?
            .ok_or_else(|| {
                EngineError::Persistence(format!(
                    "no stored features for event {}",
                    entry.event_id
                ))
            })?;
        let payload: RewardPayload =
            serde_json::from_slice(&blob).map_err(|e| EngineError::Persistence(e.to_string()))?;
        if payload.schema_version != FEATURE_SCHEMA_VERSION {
            return Err(EngineError::Persistence(format!(
                "feature blob schema v{} does not match current v{}",
                payload.schema_version, FEATURE_SCHEMA_VERSION
            )));
        }

        let lock = self.locks.user_lock(&entry.user_id).await;
        let _guard = lock.lock().await;

        let snapshot = self.stores.models.load(&entry.user_id).await?;
        let mut learner = Learner::from_snapshot(self.learner, &self.bandit, snapshot);
        learner.observe(
            &payload.features,
            &payload.context_key,
            &payload.action_key,
            entry.reward_value,
        );
        let snapshot = learner.snapshot()?;
        self.stores.models.save(&entry.user_id, &snapshot).await?;

        // The engine may hold a cached copy of this model; drop it so the
        // next event rebuilds from the repository instead of overwriting
        // the replayed update with the stale cache.
        self.engine.invalidate(&entry.user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::decision::{action_key, context_key};
    use crate::types::{RawEvent, StrategyParams, UserState};
    use mnemo_algo::BanditSnapshot;

    const T0: i64 = 1_700_000_000_000;

    fn sample_event(user_id: &str, event_id: &str, ts_ms: i64) -> RawEvent {
        RawEvent {
            user_id: user_id.into(),
            event_id: event_id.into(),
            is_correct: true,
            response_time_ms: 2400,
            timestamp_ms: ts_ms,
            ..RawEvent::default()
        }
    }

    fn wired() -> (Arc<AdaptiveEngine>, Reconciler) {
        let engine = Arc::new(AdaptiveEngine::in_memory(EngineConfig::default()));
        let reconciler = Reconciler::new(engine.clone());
        (engine, reconciler)
    }

    async fn model_update_count(stores: &EngineStores, user_id: &str) -> u64 {
        let snapshot = stores.models.load(user_id).await.unwrap().unwrap();
        let blob: BanditSnapshot = serde_json::from_value(snapshot.data).unwrap();
        blob.update_count
    }

    #[tokio::test]
    async fn due_rewards_replay_into_the_model() {
        let (engine, reconciler) = wired();
        engine.process(sample_event("u-1", "ev-1", T0)).await;
        // classify pins the strategy, so the live pass trains nothing yet
        assert_eq!(model_update_count(&engine.stores(), "u-1").await, 0);

        let due = T0 + engine.config().reconciler.default_delay_ms + 1;
        let stats = reconciler.sweep(due).await.unwrap();
        assert_eq!(stats.claimed, 1);
        assert_eq!(stats.replayed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(model_update_count(&engine.stores(), "u-1").await, 1);

        let row = engine
            .stores()
            .rewards
            .get_by_idempotency_key("u-1:ev-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, RewardQueueStatus::Done);
        assert!(row.last_error.is_none());
        assert_eq!(engine.telemetry().snapshot().rewards_replayed, 1);
    }

    #[tokio::test]
    async fn replay_drops_the_users_cached_runtime() {
        let (engine, reconciler) = wired();
        engine.process(sample_event("u-1", "ev-1", T0)).await;
        assert_eq!(engine.cache_stats().runtimes, 1);

        let due = T0 + engine.config().reconciler.default_delay_ms + 1;
        reconciler.sweep(due).await.unwrap();
        assert_eq!(engine.cache_stats().runtimes, 0);
    }

    #[tokio::test]
    async fn nothing_happens_before_the_due_time() {
        let (engine, reconciler) = wired();
        engine.process(sample_event("u-1", "ev-1", T0)).await;

        let stats = reconciler.sweep(T0 + 1000).await.unwrap();
        assert_eq!(stats.claimed, 0);
        assert_eq!(stats.replayed, 0);
    }

    #[tokio::test]
    async fn missing_blob_backs_off_then_fails_permanently() {
        let (engine, reconciler) = wired();
        let stores = engine.stores();
        let entry = RewardQueueEntry::new("u-9", "ev-lost", 0.4, T0, T0);
        stores.rewards.enqueue(entry).await.unwrap();

        let first = reconciler.sweep(T0 + 1).await.unwrap();
        assert_eq!(first.failed, 1);
        let row = stores
            .rewards
            .get_by_idempotency_key("u-9:ev-lost")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, RewardQueueStatus::Pending);
        assert_eq!(row.attempt_count, 1);
        assert!(row.last_error.as_deref().unwrap().starts_with("Retry 1/3:"));
        let backoff = engine.config().reconciler.base_backoff_ms;
        assert_eq!(row.due_at_ms, T0 + 1 + backoff);

        reconciler.sweep(row.due_at_ms + 1).await.unwrap();
        let row = stores
            .rewards
            .get_by_idempotency_key("u-9:ev-lost")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.attempt_count, 2);
        assert_eq!(row.status, RewardQueueStatus::Pending);

        reconciler.sweep(row.due_at_ms + 1).await.unwrap();
        let row = stores
            .rewards
            .get_by_idempotency_key("u-9:ev-lost")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.attempt_count, 3);
        assert_eq!(row.status, RewardQueueStatus::Failed);
        assert!(row.last_error.as_deref().unwrap().starts_with("Retry 3/3:"));
        assert_eq!(engine.telemetry().snapshot().rewards_failed, 3);
    }

    #[tokio::test]
    async fn stuck_processing_rows_recover_and_replay() {
        let (engine, reconciler) = wired();
        engine.process(sample_event("u-1", "ev-1", T0)).await;

        // claim the due row and then pretend the worker died
        let due = T0 + engine.config().reconciler.default_delay_ms + 1;
        let claimed = engine.stores().rewards.claim_due(due, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let visibility = engine.config().reconciler.visibility_timeout_ms;
        let stats = reconciler.sweep(due + visibility + 1).await.unwrap();
        assert_eq!(stats.recovered, 1);
        assert_eq!(stats.replayed, 1);

        let row = engine
            .stores()
            .rewards
            .get_by_idempotency_key("u-1:ev-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, RewardQueueStatus::Done);
    }

    #[tokio::test]
    async fn outdated_schema_blob_is_an_explicit_failure() {
        let (engine, reconciler) = wired();
        let stores = engine.stores();
        let payload = RewardPayload {
            features: vec![0.1; 12],
            context_key: context_key(&UserState::default()),
            action_key: action_key(&StrategyParams::default()),
            schema_version: 1,
        };
        stores
            .features
            .put("ev-old", serde_json::to_vec(&payload).unwrap())
            .await
            .unwrap();
        stores
            .rewards
            .enqueue(RewardQueueEntry::new("u-1", "ev-old", 0.5, T0, T0))
            .await
            .unwrap();

        let stats = reconciler.sweep(T0 + 1).await.unwrap();
        assert_eq!(stats.failed, 1);
        let row = stores
            .rewards
            .get_by_idempotency_key("u-1:ev-old")
            .await
            .unwrap()
            .unwrap();
        assert!(row.last_error.as_deref().unwrap().contains("schema"));
    }
}
