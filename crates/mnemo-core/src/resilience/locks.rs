//! Per-user serialization seam.
//!
//! Processing for one user must never interleave with itself: the pipeline
//! acquires the user's mutex before touching estimators or persisting. The
//! provider is a trait so a multi-node deployment can plug in a shared
//! lease; the default is an in-process registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;

#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Handle for serializing work on one user. Callers hold the guard
    /// across the pipeline, await points included.
    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>>;
}

#[derive(Debug, Default)]
pub struct InProcessLocks {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

#[async_trait]
impl LockProvider for InProcessLocks {
    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().get(user_id) {
            return lock.clone();
        }
        self.locks
            .write()
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
