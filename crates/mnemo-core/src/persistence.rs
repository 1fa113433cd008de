//! Repository seams and the in-memory stores behind them.
//!
//! The engine only ever talks to these traits; the in-memory versions are
//! both the default wiring and the test fixtures. Every method clones in
//! and out so callers never share interior references, and no lock is held
//! across an await.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision::LearnerSnapshot;
use crate::error::EngineError;
use crate::types::UserRecord;

/// Lifecycle of a delayed-reward row. Stored in SCREAMING_SNAKE_CASE so
/// rows written by earlier deployments keep deserializing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardQueueStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardQueueEntry {
    pub id: String,
    pub user_id: String,
    pub event_id: String,
    pub due_at_ms: i64,
    pub reward_value: f64,
    pub status: RewardQueueStatus,
    /// Unique key; a second enqueue with the same key returns this row.
    pub idempotency_key: String,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// Stamp of the last status transition; drives stuck-row recovery.
    pub updated_at_ms: i64,
}

impl RewardQueueEntry {
    pub fn new(
        user_id: &str,
        event_id: &str,
        reward_value: f64,
        due_at_ms: i64,
        now_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            event_id: event_id.to_string(),
            due_at_ms,
            reward_value,
            status: RewardQueueStatus::Pending,
            idempotency_key: format!("{}:{}", user_id, event_id),
            attempt_count: 0,
            last_error: None,
            updated_at_ms: now_ms,
        }
    }
}

#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<Option<UserRecord>, EngineError>;
    async fn save(&self, record: &UserRecord) -> Result<(), EngineError>;
}

#[async_trait]
pub trait ModelRepository: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<Option<LearnerSnapshot>, EngineError>;
    async fn save(&self, user_id: &str, snapshot: &LearnerSnapshot) -> Result<(), EngineError>;
}

/// Opaque blob store keyed by event id; holds the serialized replay
/// context a delayed reward needs.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn put(&self, event_id: &str, blob: Vec<u8>) -> Result<(), EngineError>;
    async fn get(&self, event_id: &str) -> Result<Option<Vec<u8>>, EngineError>;
}

#[async_trait]
pub trait RewardQueueStore: Send + Sync {
    /// Inserts the entry, or returns the existing row when its idempotency
    /// key was enqueued before.
    async fn enqueue(&self, entry: RewardQueueEntry) -> Result<RewardQueueEntry, EngineError>;

    /// Atomically claims due PENDING rows: marks them PROCESSING and
    /// returns them, oldest due first, at most `limit`.
    async fn claim_due(
        &self,
        now_ms: i64,
        limit: usize,
    ) -> Result<Vec<RewardQueueEntry>, EngineError>;

    /// Replaces the stored row with the caller's updated copy.
    async fn update_status(&self, entry: &RewardQueueEntry) -> Result<(), EngineError>;

    /// Returns PROCESSING rows whose last transition is older than the
    /// cutoff back to PENDING. Returns how many rows were recovered.
    async fn recover_stuck(&self, cutoff_ms: i64, now_ms: i64) -> Result<u64, EngineError>;

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<RewardQueueEntry>, EngineError>;
}

#[derive(Debug, Default)]
pub struct InMemoryStateRepository {
    records: RwLock<HashMap<String, UserRecord>>,
}

#[async_trait]
impl StateRepository for InMemoryStateRepository {
    async fn load(&self, user_id: &str) -> Result<Option<UserRecord>, EngineError> {
        Ok(self.records.read().get(user_id).cloned())
    }

    async fn save(&self, record: &UserRecord) -> Result<(), EngineError> {
        self.records
            .write()
            .insert(record.user_id.clone(), record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryModelRepository {
    snapshots: RwLock<HashMap<String, LearnerSnapshot>>,
}

#[async_trait]
impl ModelRepository for InMemoryModelRepository {
    async fn load(&self, user_id: &str) -> Result<Option<LearnerSnapshot>, EngineError> {
        Ok(self.snapshots.read().get(user_id).cloned())
    }

    async fn save(&self, user_id: &str, snapshot: &LearnerSnapshot) -> Result<(), EngineError> {
        self.snapshots
            .write()
            .insert(user_id.to_string(), snapshot.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryFeatureStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl FeatureStore for InMemoryFeatureStore {
    async fn put(&self, event_id: &str, blob: Vec<u8>) -> Result<(), EngineError> {
        self.blobs.write().insert(event_id.to_string(), blob);
        Ok(())
    }

    async fn get(&self, event_id: &str) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.blobs.read().get(event_id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRewardQueue {
    rows: RwLock<HashMap<String, RewardQueueEntry>>,
    key_index: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl RewardQueueStore for InMemoryRewardQueue {
    async fn enqueue(&self, entry: RewardQueueEntry) -> Result<RewardQueueEntry, EngineError> {
        {
            let key_index = self.key_index.read();
            if let Some(existing_id) = key_index.get(&entry.idempotency_key) {
                if let Some(existing) = self.rows.read().get(existing_id) {
                    return Ok(existing.clone());
                }
            }
        }
        self.key_index
            .write()
            .insert(entry.idempotency_key.clone(), entry.id.clone());
        self.rows.write().insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn claim_due(
        &self,
        now_ms: i64,
        limit: usize,
    ) -> Result<Vec<RewardQueueEntry>, EngineError> {
        let mut rows = self.rows.write();
        let mut due: Vec<String> = rows
            .values()
            .filter(|e| e.status == RewardQueueStatus::Pending && e.due_at_ms <= now_ms)
            .map(|e| e.id.clone())
            .collect();
        due.sort_by_key(|id| rows.get(id).map(|e| e.due_at_ms).unwrap_or(i64::MAX));
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(entry) = rows.get_mut(&id) {
                entry.status = RewardQueueStatus::Processing;
                entry.updated_at_ms = now_ms;
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn update_status(&self, entry: &RewardQueueEntry) -> Result<(), EngineError> {
        let mut rows = self.rows.write();
        match rows.get_mut(&entry.id) {
            Some(stored) => {
                *stored = entry.clone();
                Ok(())
            }
            None => Err(EngineError::Persistence(format!(
                "reward queue row {} not found",
                entry.id
            ))),
        }
    }

    async fn recover_stuck(&self, cutoff_ms: i64, now_ms: i64) -> Result<u64, EngineError> {
        let mut rows = self.rows.write();
        let mut recovered = 0;
        for entry in rows.values_mut() {
            if entry.status == RewardQueueStatus::Processing && entry.updated_at_ms < cutoff_ms {
                entry.status = RewardQueueStatus::Pending;
                entry.updated_at_ms = now_ms;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<RewardQueueEntry>, EngineError> {
        let key_index = self.key_index.read();
        let Some(id) = key_index.get(key) else {
            return Ok(None);
        };
        Ok(self.rows.read().get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserState;

    #[tokio::test]
    async fn state_repository_round_trips() {
        let repo = InMemoryStateRepository::default();
        assert!(repo.load("u1").await.unwrap().is_none());

        let mut record = UserRecord::new("u1".to_string(), 1_000);
        record.state = UserState {
            fatigue: 0.4,
            ..UserState::default()
        };
        repo.save(&record).await.unwrap();

        let loaded = repo.load("u1").await.unwrap().unwrap();
        assert_eq!(loaded.user_id, "u1");
        assert!((loaded.state.fatigue - 0.4).abs() < 1e-12);
    }

    #[tokio::test]
    async fn feature_store_round_trips_blobs() {
        let store = InMemoryFeatureStore::default();
        store.put("evt-1", vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get("evt-1").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(store.get("evt-2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_per_key() {
        let queue = InMemoryRewardQueue::default();
        let first = queue
            .enqueue(RewardQueueEntry::new("u1", "evt-1", 0.5, 10_000, 0))
            .await
            .unwrap();
        let second = queue
            .enqueue(RewardQueueEntry::new("u1", "evt-1", 0.9, 20_000, 5))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert!((second.reward_value - 0.5).abs() < 1e-12);

        let by_key = queue
            .get_by_idempotency_key("u1:evt-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key.id, first.id);
    }

    #[tokio::test]
    async fn claim_due_takes_oldest_first_and_marks_processing() {
        let queue = InMemoryRewardQueue::default();
        for (event, due) in [("evt-1", 3_000), ("evt-2", 1_000), ("evt-3", 2_000)] {
            queue
                .enqueue(RewardQueueEntry::new("u1", event, 0.5, due, 0))
                .await
                .unwrap();
        }
        queue
            .enqueue(RewardQueueEntry::new("u1", "evt-later", 0.5, 99_000, 0))
            .await
            .unwrap();

        let claimed = queue.claim_due(5_000, 2).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].event_id, "evt-2");
        assert_eq!(claimed[1].event_id, "evt-3");
        assert!(claimed
            .iter()
            .all(|e| e.status == RewardQueueStatus::Processing));

        // an immediate second claim sees neither the processing nor the
        // not-yet-due rows
        let again = queue.claim_due(5_000, 10).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].event_id, "evt-1");
    }

    #[tokio::test]
    async fn recover_stuck_only_touches_old_processing_rows() {
        let queue = InMemoryRewardQueue::default();
        queue
            .enqueue(RewardQueueEntry::new("u1", "evt-1", 0.5, 0, 0))
            .await
            .unwrap();
        queue
            .enqueue(RewardQueueEntry::new("u1", "evt-2", 0.5, 0, 0))
            .await
            .unwrap();

        let claimed = queue.claim_due(1_000, 10).await.unwrap();
        assert_eq!(claimed.len(), 2);

        // cutoff below the claim stamp recovers nothing
        assert_eq!(queue.recover_stuck(500, 2_000).await.unwrap(), 0);
        // cutoff above it recovers both
        assert_eq!(queue.recover_stuck(5_000, 6_000).await.unwrap(), 2);

        let reclaimed = queue.claim_due(7_000, 10).await.unwrap();
        assert_eq!(reclaimed.len(), 2);
    }

    #[tokio::test]
    async fn update_status_replaces_the_row() {
        let queue = InMemoryRewardQueue::default();
        let mut entry = queue
            .enqueue(RewardQueueEntry::new("u1", "evt-1", 0.5, 0, 0))
            .await
            .unwrap();
        entry.status = RewardQueueStatus::Failed;
        entry.attempt_count = 3;
        entry.last_error = Some("Retry 3/3: replay failed".to_string());
        queue.update_status(&entry).await.unwrap();

        let stored = queue
            .get_by_idempotency_key("u1:evt-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, RewardQueueStatus::Failed);
        assert_eq!(stored.attempt_count, 3);
    }

    #[tokio::test]
    async fn update_status_rejects_unknown_rows() {
        let queue = InMemoryRewardQueue::default();
        let entry = RewardQueueEntry::new("u1", "evt-1", 0.5, 0, 0);
        assert!(queue.update_status(&entry).await.is_err());
    }

    #[test]
    fn queue_status_serializes_screaming_snake() {
        let json = serde_json::to_string(&RewardQueueStatus::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
        let parsed: RewardQueueStatus = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(parsed, RewardQueueStatus::Failed);
    }
}
