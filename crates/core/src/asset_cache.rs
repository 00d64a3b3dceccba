//! Short-lived result cache for synchronous adapters.
//!
//! A synchronous provider hands back the image during submit; the adapter
//! parks it here until the caller fetches it. Entries expire so a job that
//! is never fetched does not pin its bytes forever.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long an unfetched result is kept.
pub const DEFAULT_ASSET_TTL: Duration = Duration::from_secs(15 * 60);

struct CachedAsset {
    stored_at: Instant,
    bytes: Vec<u8>,
}

pub struct AssetCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedAsset>>,
}

impl AssetCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Store a result, evicting anything that has expired.
    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, cached| now.duration_since(cached.stored_at) < self.ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired cached results");
        }
        entries.insert(
            key.into(),
            CachedAsset {
                stored_at: now,
                bytes,
            },
        );
    }

    /// Whether an unexpired result exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .is_some_and(|cached| cached.stored_at.elapsed() < self.ttl)
    }

    /// Remove and return the result for `key`, if present and unexpired.
    pub fn take(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .remove(key)
            .filter(|cached| cached.stored_at.elapsed() < self.ttl)
            .map(|cached| cached.bytes)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AssetCache {
    fn default() -> Self {
        Self::new(DEFAULT_ASSET_TTL)
    }
}
