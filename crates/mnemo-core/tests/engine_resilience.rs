//! Failure-path behavior: breaker trips, timeouts, and fallback rungs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mnemo_core::config::EngineConfig;
use mnemo_core::engine::{AdaptiveEngine, EngineStores};
use mnemo_core::error::{EngineError, FallbackReason};
use mnemo_core::persistence::{
    InMemoryFeatureStore, InMemoryModelRepository, InMemoryRewardQueue, InMemoryStateRepository,
    StateRepository,
};
use mnemo_core::types::{RawEvent, StrategyParams, UserRecord};

const T0: i64 = 1_700_000_000_000;

fn event(user_id: &str, ts_ms: i64) -> RawEvent {
    RawEvent {
        user_id: user_id.into(),
        is_correct: true,
        response_time_ms: 2500,
        timestamp_ms: ts_ms,
        ..RawEvent::default()
    }
}

/// State store whose writes can be switched off, standing in for a database
/// outage. Reads keep working so fallbacks still find the last known record.
struct FlakyStateRepository {
    inner: InMemoryStateRepository,
    healthy: AtomicBool,
}

impl FlakyStateRepository {
    fn new() -> Self {
        Self {
            inner: InMemoryStateRepository::default(),
            healthy: AtomicBool::new(true),
        }
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

#[async_trait]
impl StateRepository for FlakyStateRepository {
    async fn load(&self, user_id: &str) -> Result<Option<UserRecord>, EngineError> {
        self.inner.load(user_id).await
    }

    async fn save(&self, record: &UserRecord) -> Result<(), EngineError> {
        if !self.healthy.load(Ordering::Relaxed) {
            return Err(EngineError::Persistence("state store unavailable".into()));
        }
        self.inner.save(record).await
    }
}

/// Store that answers after a fixed delay, long enough to blow the budget.
struct SlowStateRepository {
    delay: Duration,
}

#[async_trait]
impl StateRepository for SlowStateRepository {
    async fn load(&self, _user_id: &str) -> Result<Option<UserRecord>, EngineError> {
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }

    async fn save(&self, _record: &UserRecord) -> Result<(), EngineError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

fn engine_with_flaky_store() -> (AdaptiveEngine, Arc<FlakyStateRepository>) {
    let flaky = Arc::new(FlakyStateRepository::new());
    let stores = EngineStores {
        states: flaky.clone(),
        models: Arc::new(InMemoryModelRepository::default()),
        features: Arc::new(InMemoryFeatureStore::default()),
        rewards: Arc::new(InMemoryRewardQueue::default()),
    };
    let mut config = EngineConfig::default();
    config.resilience.breaker.window = 8;
    config.resilience.breaker.min_samples = 4;
    config.resilience.breaker.cooldown_ms = 300;
    config.resilience.breaker.half_open_probes = 1;
    (AdaptiveEngine::new(config, stores), flaky)
}

#[tokio::test]
async fn save_failures_trip_the_breaker_and_a_probe_closes_it() {
    let (engine, flaky) = engine_with_flaky_store();

    // one good pass persists a baseline for the fallback rungs
    let good = engine.process(event("u-1", T0)).await;
    assert!(!good.degraded);
    let known_strategy = good.strategy.clone();

    flaky.set_healthy(false);
    let mut saw_circuit_open = false;
    for i in 1..=12i64 {
        let result = engine.process(event("u-1", T0 + i * 10_000)).await;
        assert!(result.degraded);
        match result.fallback_reason {
            Some(FallbackReason::DegradedState) => {
                // the pipeline ran and the write failed at the end
                assert_eq!(result.strategy, known_strategy);
            }
            Some(FallbackReason::CircuitOpen) => {
                saw_circuit_open = true;
                assert_eq!(result.strategy, known_strategy);
            }
            other => panic!("unexpected fallback reason: {other:?}"),
        }
        assert!(!result.explanation.summary.is_empty());
    }
    assert!(saw_circuit_open);
    assert!(engine.telemetry().snapshot().breaker_opened >= 1);

    // heal the store and wait out the wall-clock cool-down
    flaky.set_healthy(true);
    tokio::time::sleep(Duration::from_millis(400)).await;
    let probe = engine.process(event("u-1", T0 + 999_000)).await;
    assert!(!probe.degraded);
    assert!(engine.telemetry().snapshot().breaker_closed >= 1);

    let after = engine.process(event("u-1", T0 + 1_030_000)).await;
    assert!(!after.degraded);
}

#[tokio::test]
async fn degraded_results_never_panic_for_unknown_users() {
    let (engine, flaky) = engine_with_flaky_store();
    flaky.set_healthy(false);

    // no baseline exists, so the ladder bottoms out at the default strategy
    let result = engine.process(event("u-nobody", T0)).await;
    assert!(result.degraded);
    assert_eq!(result.fallback_reason, Some(FallbackReason::DegradedState));
    assert_eq!(result.strategy, StrategyParams::default());
    assert!(result.explanation.summary.contains("default strategy"));
}

#[tokio::test(start_paused = true)]
async fn slow_stores_hit_the_timeout_and_commit_nothing() {
    let stores = EngineStores {
        states: Arc::new(SlowStateRepository {
            delay: Duration::from_millis(500),
        }),
        models: Arc::new(InMemoryModelRepository::default()),
        features: Arc::new(InMemoryFeatureStore::default()),
        rewards: Arc::new(InMemoryRewardQueue::default()),
    };
    let engine = AdaptiveEngine::new(EngineConfig::default(), stores);

    let result = engine.process(event("u-slow", T0)).await;
    assert!(result.degraded);
    assert_eq!(result.fallback_reason, Some(FallbackReason::Timeout));
    assert_eq!(result.strategy, StrategyParams::default());

    // the cancelled pipeline leaves nothing half-written behind
    assert_eq!(engine.cache_stats().records, 0);
    assert_eq!(engine.cache_stats().runtimes, 0);

    let snapshot = engine.telemetry().snapshot();
    assert_eq!(snapshot.fallback_timeout, 1);
    assert_eq!(snapshot.decisions, 0);
    assert_eq!(snapshot.degraded, 1);
}

#[tokio::test]
async fn invalid_events_are_rejected_before_the_breaker() {
    let (engine, _flaky) = engine_with_flaky_store();

    let mut bad = event("u-2", T0);
    bad.user_id = String::new();
    for _ in 0..10 {
        let result = engine.process(bad.clone()).await;
        assert!(result.degraded);
        assert_eq!(result.fallback_reason, Some(FallbackReason::Exception));
    }

    // garbage input is not an outage signal
    let good = engine.process(event("u-2", T0)).await;
    assert!(!good.degraded);
    assert_eq!(engine.telemetry().snapshot().breaker_opened, 0);
}
