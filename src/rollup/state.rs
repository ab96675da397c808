use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per sensor id, created on first use. Every
/// load-mutate-save of a record runs while holding that sensor's guard, so
/// ingests and sweeps of the same sensor never interleave.
#[derive(Clone, Debug, Default)]
pub struct SensorLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SensorLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, sensor_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().await;
            locks.entry(sensor_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drops the lock entry of a removed sensor. Holders of an existing guard
    /// keep it until they release.
    pub async fn forget(&self, sensor_id: &str) {
        self.inner.lock().await.remove(sensor_id);
    }

    pub async fn tracked(&self) -> usize {
        self.inner.lock().await.len()
    }
}
