//! End-to-end engine flows against the in-memory stores.

use mnemo_algo::{BanditSnapshot, LinUcbModel, FEATURE_DIMENSION};
use mnemo_core::config::{EngineConfig, LearnerKind};
use mnemo_core::decision::LearnerSnapshot;
use mnemo_core::engine::{AdaptiveEngine, EngineStores};
use mnemo_core::persistence::{ModelRepository, StateRepository};
use mnemo_core::strategy::{BATCH_GRID, HINT_GRID, INTERVAL_GRID, RATIO_GRID};
use mnemo_core::types::{ColdStartPhase, RawEvent, UserRecord};

const T0: i64 = 1_700_000_000_000;

fn healthy_event(user_id: &str, ts_ms: i64) -> RawEvent {
    RawEvent {
        user_id: user_id.into(),
        is_correct: true,
        response_time_ms: 2300,
        timestamp_ms: ts_ms,
        ..RawEvent::default()
    }
}

#[tokio::test]
async fn a_user_journey_walks_the_cold_start_phases() {
    let engine = AdaptiveEngine::in_memory(EngineConfig::default());
    let mut results = Vec::new();
    for i in 0..55u64 {
        let ts = T0 + i as i64 * 45_000;
        results.push(engine.process(healthy_event("u-journey", ts)).await);
    }

    assert!(results.iter().all(|r| !r.degraded));
    assert_eq!(results[0].phase, Some(ColdStartPhase::Classify));
    assert_eq!(results[14].phase, Some(ColdStartPhase::Classify));
    assert_eq!(results[15].phase, Some(ColdStartPhase::Explore));
    assert_eq!(results[49].phase, Some(ColdStartPhase::Explore));
    assert_eq!(results[50].phase, Some(ColdStartPhase::Normal));

    for r in &results {
        assert!((-1.0..=1.0).contains(&r.reward.value));
        assert!(INTERVAL_GRID
            .iter()
            .any(|g| (g - r.strategy.interval_scale).abs() < 1e-9));
        assert!(RATIO_GRID
            .iter()
            .any(|g| (g - r.strategy.new_ratio).abs() < 1e-9));
        assert!(BATCH_GRID.contains(&r.strategy.batch_size));
        assert!(HINT_GRID.contains(&r.strategy.hint_level));
        assert!(!r.explanation.summary.is_empty());
        assert!((0.0..=1.0).contains(&r.state.attention));
        assert!((0.0..=1.0).contains(&r.state.fatigue));
        assert!((-1.0..=1.0).contains(&r.state.motivation));
    }
}

#[tokio::test]
async fn the_learner_trains_only_past_classification() {
    let engine = AdaptiveEngine::in_memory(EngineConfig::default());
    for i in 0..60u64 {
        let ts = T0 + i as i64 * 30_000;
        engine.process(healthy_event("u-train", ts)).await;
    }

    let stores = engine.stores();
    let snapshot = stores.models.load("u-train").await.unwrap().unwrap();
    assert_eq!(snapshot.kind, LearnerKind::Linucb);
    let blob: BanditSnapshot = serde_json::from_value(snapshot.data).unwrap();
    assert_eq!(blob.d, FEATURE_DIMENSION);
    // the first 15 events are pinned by classification and train nothing
    assert_eq!(blob.update_count, 45);
}

#[tokio::test]
async fn an_old_12_dim_model_migrates_on_first_use() {
    let stores = EngineStores::in_memory();

    let mut old = LinUcbModel::new(12, 1.0, 0.3);
    for i in 0..6 {
        let x: Vec<f64> = (0..12).map(|j| ((i * 12 + j) as f64 * 0.01).sin()).collect();
        old.update(&x, 0.4);
    }
    let snapshot = LearnerSnapshot {
        kind: LearnerKind::Linucb,
        data: serde_json::to_value(old.snapshot()).unwrap(),
    };
    stores.models.save("u-old", &snapshot).await.unwrap();

    let mut record = UserRecord::new("u-old", T0 - 60_000);
    record.interaction_count = 60;
    record.cold_start.phase = ColdStartPhase::Normal;
    stores.states.save(&record).await.unwrap();

    let engine = AdaptiveEngine::new(EngineConfig::default(), stores.clone());
    let result = engine.process(healthy_event("u-old", T0)).await;
    assert!(!result.degraded);
    assert_eq!(result.phase, Some(ColdStartPhase::Normal));

    let migrated = stores.models.load("u-old").await.unwrap().unwrap();
    let blob: BanditSnapshot = serde_json::from_value(migrated.data).unwrap();
    assert_eq!(blob.d, FEATURE_DIMENSION);
    // six historical updates survive the widening, plus the live one
    assert_eq!(blob.update_count, 7);
}

#[tokio::test]
async fn thompson_learner_runs_the_same_pipeline() {
    let mut config = EngineConfig::default();
    config.learner = LearnerKind::Thompson;
    let engine = AdaptiveEngine::in_memory(config);

    let mut last = None;
    for i in 0..20u64 {
        let ts = T0 + i as i64 * 30_000;
        last = Some(engine.process(healthy_event("u-ts", ts)).await);
    }
    let result = last.unwrap();
    assert!(!result.degraded);
    assert_eq!(result.phase, Some(ColdStartPhase::Explore));

    let stores = engine.stores();
    let snapshot = stores.models.load("u-ts").await.unwrap().unwrap();
    assert_eq!(snapshot.kind, LearnerKind::Thompson);
}

#[tokio::test]
async fn feature_vectors_come_back_versioned_and_labeled() {
    let engine = AdaptiveEngine::in_memory(EngineConfig::default());
    let result = engine.process(healthy_event("u-fv", T0)).await;
    let fv = result.feature_vector.expect("live result carries features");
    assert_eq!(fv.dim(), FEATURE_DIMENSION);
    assert_eq!(fv.labels.len(), FEATURE_DIMENSION);
    assert_eq!(fv.schema_version, mnemo_core::types::FEATURE_SCHEMA_VERSION);
    assert!(fv.values.iter().all(|v| v.is_finite()));
}
