// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Keyed TTL (Time-To-Live) cache for reducing repeated coordination-chain queries.
//!
//! Each entry remembers when it was written; reads older than the TTL miss.
//! Each client owns its instances, so tests get isolated caches.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    updated_at: Instant,
}

/// A thread-safe keyed cache with per-entry expiration.
///
/// # Example
/// ```ignore
/// let cache = TtlCache::<String, u64>::new(Duration::from_secs(5));
/// cache.update("eth".to_string(), 12345).await;
/// if let Some(value) = cache.get_if_valid(&"eth".to_string()).await {
///     println!("Cached value: {}", value);
/// }
/// ```
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    cache_duration: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(cache_duration: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            cache_duration,
        }
    }

    /// Return the cached value for `key` if it has not expired yet.
    pub async fn get_if_valid(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.updated_at.elapsed() < self.cache_duration)
            .map(|entry| entry.value.clone())
    }

    /// Store `value`, replacing the entry and its age. Expired entries are
    /// dropped on the way so the map does not grow with stale keys.
    pub async fn update(&self, key: K, value: V) {
        let ttl = self.cache_duration;
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.updated_at.elapsed() < ttl);
        entries.insert(
            key,
            Entry {
                value,
                updated_at: Instant::now(),
            },
        );
    }
}
