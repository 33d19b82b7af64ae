//! Shared Cache Collaborator
//!
//! Cross-instance cache used to mirror sanitized room views so sibling
//! gateway instances can discover membership. Advisory only: the owning
//! instance stays authoritative for its own connections, and every call is
//! best-effort.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Shared external cache: JSON string values with per-key TTL.
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Get a value, if present and not expired.
    async fn get(&self, key: &str) -> Option<String>;

    /// Set a value with a TTL in seconds (0 = no expiry).
    async fn set(&self, key: &str, value: &str, ttl_secs: u64);

    /// Delete a key.
    async fn del(&self, key: &str);
}

/// Convenience JSON helpers over any [`SharedCache`].
#[async_trait]
pub trait SharedCacheExt: SharedCache {
    /// Get and deserialize a JSON value.
    async fn get_json<T: serde::de::DeserializeOwned + Send>(&self, key: &str) -> Option<T> {
        self.get(key)
            .await
            .and_then(|s| serde_json::from_str(&s).ok())
    }

    /// Serialize and set a JSON value.
    async fn set_json<T: serde::Serialize + Sync>(&self, key: &str, value: &T, ttl_secs: u64) {
        if let Ok(json) = serde_json::to_string(value) {
            self.set(key, &json, ttl_secs).await;
        }
    }
}

impl<C: SharedCache + ?Sized> SharedCacheExt for C {}

// =============================================================================
// IN-MEMORY IMPLEMENTATION
// =============================================================================

/// In-process cache with TTL semantics. Default backend and test double;
/// a networked backend plugs in behind the same trait.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter(|(_, exp)| exp.map(|e| e > now).unwrap_or(true))
            .count()
    }

    /// Whether the cache holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires)) => {
                if let Some(expires) = expires {
                    if *expires <= Instant::now() {
                        entries.remove(key);
                        return None;
                    }
                }
                Some(value.clone())
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) {
        let expires = if ttl_secs > 0 {
            Some(Instant::now() + Duration::from_secs(ttl_secs))
        } else {
            None
        };
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value.to_string(), expires));
    }

    async fn del(&self, key: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_del_roundtrip() {
        let cache = MemoryCache::new();
        cache.set("k", "v", 0).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        cache.del("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn expired_entry_is_gone() {
        let cache = MemoryCache::new();
        cache.set("k", "v", 1).await;

        // Force-expire by rewriting with an already-elapsed deadline.
        {
            let mut entries = cache.entries.lock().await;
            if let Some(entry) = entries.get_mut("k") {
                entry.1 = Some(Instant::now() - Duration::from_secs(1));
            }
        }

        assert_eq!(cache.get("k").await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn json_helpers() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct View {
            id: String,
            players: u32,
        }

        let cache = MemoryCache::new();
        let view = View {
            id: "r1".into(),
            players: 3,
        };
        cache.set_json("room:r1", &view, 0).await;

        let got: View = cache.get_json("room:r1").await.unwrap();
        assert_eq!(got, view);
    }
}
