use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug)]
pub struct IngestStats {
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub last_persist_unix_ms: AtomicU64,
    pub average_persist_micros: AtomicU64,
    pub sweeps_run: AtomicU64,
    pub buckets_cleared: AtomicU64,
    pub mqtt_connected: AtomicBool,
    pub last_error: Mutex<Option<String>>,
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            last_persist_unix_ms: AtomicU64::new(0),
            average_persist_micros: AtomicU64::new(0),
            sweeps_run: AtomicU64::new(0),
            buckets_cleared: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist(&self, elapsed: Duration) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.last_persist_unix_ms.store(now, Ordering::Relaxed);
        let micros = elapsed.as_micros() as u64;
        let prev = self.average_persist_micros.load(Ordering::Relaxed);
        let avg = if prev == 0 { micros } else { (prev + micros) / 2 };
        self.average_persist_micros.store(avg, Ordering::Relaxed);
        self.clear_error();
    }

    pub fn record_sweep(&self, buckets_cleared: u64) {
        self.sweeps_run.fetch_add(1, Ordering::Relaxed);
        self.buckets_cleared
            .fetch_add(buckets_cleared, Ordering::Relaxed);
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_clears_previous_error() {
        let stats = IngestStats::new();
        stats.record_error("store unavailable");
        assert_eq!(stats.last_error().as_deref(), Some("store unavailable"));

        stats.record_persist(Duration::from_micros(400));
        assert_eq!(stats.last_error(), None);
        assert_eq!(stats.accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.average_persist_micros.load(Ordering::Relaxed), 400);

        stats.record_persist(Duration::from_micros(200));
        assert_eq!(stats.average_persist_micros.load(Ordering::Relaxed), 300);
    }
}
