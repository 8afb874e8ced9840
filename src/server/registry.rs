//! Worker-local registry of live connections.
//!
//! The accept loop needs two things it cannot get from connection tasks
//! directly: the current connection count (for the per-worker ceiling) and a
//! way to force idle connections closed when the process runs out of file
//! descriptors. Each connection registers itself here for its lifetime and
//! publishes its last-activity time; eviction is a notification the
//! connection observes at its next suspension point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

struct Handle {
    last_activity: Arc<AtomicU64>,
    evict: Arc<Notify>,
}

pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, Handle>>,
    next_id: AtomicU64,
    epoch: Instant,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            epoch: Instant::now(),
        })
    }

    fn now_secs(&self) -> u64 {
        self.epoch.elapsed().as_secs()
    }

    /// Adds a connection. The registration deregisters itself on drop.
    pub fn register(self: &Arc<Self>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let last_activity = Arc::new(AtomicU64::new(self.now_secs()));
        let evict = Arc::new(Notify::new());

        self.connections.lock().unwrap().insert(
            id,
            Handle {
                last_activity: Arc::clone(&last_activity),
                evict: Arc::clone(&evict),
            },
        );

        Registration {
            id,
            last_activity,
            evict,
            registry: Arc::clone(self),
        }
    }

    /// Live connection count.
    pub fn active(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Asks up to `limit` connections idle longer than `idle_for` to close.
    /// Returns how many were notified.
    pub fn evict_idle(&self, limit: usize, idle_for: Duration) -> usize {
        let now = self.now_secs();
        let threshold = idle_for.as_secs();
        let connections = self.connections.lock().unwrap();

        let mut evicted = 0;
        for handle in connections.values() {
            if evicted >= limit {
                break;
            }
            if now.saturating_sub(handle.last_activity.load(Ordering::Relaxed)) > threshold {
                handle.evict.notify_one();
                evicted += 1;
            }
        }
        evicted
    }
}

/// One connection's membership in the registry.
pub struct Registration {
    id: u64,
    last_activity: Arc<AtomicU64>,
    evict: Arc<Notify>,
    registry: Arc<ConnectionRegistry>,
}

impl Registration {
    /// Records activity so the eviction sweep skips this connection.
    pub fn touch(&self) {
        self.last_activity
            .store(self.registry.now_secs(), Ordering::Relaxed);
    }

    /// Resolves when the accept loop asks this connection to close.
    pub async fn evicted(&self) {
        self.evict.notified().await;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.connections.lock().unwrap().remove(&self.id);
    }
}
