//! In-process lock registry for tag and upload-session serialization.
//!
//! Locks are keyed by string and handed out as owned guards so handlers can
//! hold them across awaits. Entries are dropped once no handler holds the
//! lock, keeping the map bounded by in-flight work. None of these locks is
//! ever held across a remote HTTP call.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of named in-process locks.
#[derive(Default)]
pub struct LockRegistry {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting if another holder is active.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        self.prune().await;
        guard
    }

    /// Drop entries no longer held by anyone. The registry arc plus the one
    /// acquiring caller gives strong_count > 2 for contended entries.
    async fn prune(&self) {
        let mut map = self.inner.lock().await;
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Lock key for tag writes.
    pub fn tag_key(registry_id: i64, image_id: i64, tag: &str) -> String {
        format!("tag:{registry_id}:{image_id}:{tag}")
    }

    /// Lock key for upload session appends.
    pub fn upload_key(session: &uuid::Uuid) -> String {
        format!("upload:{session}")
    }
}
