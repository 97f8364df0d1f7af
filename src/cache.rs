//! Caching layer for plans, capability results, and full answers
//!
//! Backed by a generic key-value contract with TTL semantics so the core
//! stays agnostic to the store. A store failure is always treated as a
//! miss, never surfaced to the user.

use crate::models::QueryMode;
use crate::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Generic key-value cache contract with TTL semantics.
///
/// Lookups after expiry are misses; a miss never blocks the caller.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;
    async fn evict(&self, key: &str) -> Result<()>;
}

//
// ================= Key Derivation =================
//

/// Normalize free text: case-fold, trim, collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn hash_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)
}

/// Key for a cached planner decision for `(query_text, mode)`.
pub fn plan_key(query_text: &str, mode: QueryMode) -> String {
    format!("plan:{}", hash_hex(&format!("{}|{}", mode, normalize_text(query_text))))
}

/// Key for a cached full answer for a query.
pub fn answer_key(query_text: &str) -> String {
    format!("answer:{}", hash_hex(&normalize_text(query_text)))
}

/// Key for a cached capability result: capability id + parameter pairs
/// sorted by name, so semantically identical calls share an entry.
pub fn result_key(capability: &str, params: &Value) -> String {
    let canonical = match params.as_object() {
        Some(map) => {
            let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| k.as_str());
            pairs
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&")
        }
        None => params.to_string(),
    };
    format!("result:{}", hash_hex(&format!("{}|{}", capability, canonical)))
}

//
// ================= In-Memory Store =================
//

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// In-memory cache store.
///
/// Entries are written atomically under the lock so no caller ever observes
/// a value before the corresponding `put` returns. Expired entries are
/// evicted lazily on lookup.
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let expired = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut entries = self.entries.write().await;
            // Re-check under the write lock: a fresh put may have raced in.
            if let Some(entry) = entries.get(key) {
                if entry.expires_at > Instant::now() {
                    return Ok(Some(entry.value.clone()));
                }
                entries.remove(key);
                debug!(key, "Evicted expired cache entry");
            }
        }

        Ok(None)
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}

//
// ================= No-op Store =================
//

/// Degraded-mode store used when caching is disabled or the backing store
/// is unavailable: every lookup is a miss, every write is dropped.
pub struct NoopCache;

#[async_trait::async_trait]
impl CacheStore for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn evict(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Fire-and-forget cache write: a store failure is logged as a miss-grade
/// event and never fails the user-facing operation.
pub async fn put_quietly(cache: &dyn CacheStore, key: &str, value: Value, ttl: Duration) {
    if let Err(e) = cache.put(key, value, ttl).await {
        tracing::warn!(key, error = %e, "Cache write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_text() {
        assert_eq!(
            normalize_text("  What IS   the price\tof AAPL? "),
            "what is the price of aapl?"
        );
    }

    #[test]
    fn test_plan_key_is_mode_sensitive() {
        let sonar = plan_key("compare TSLA and F", QueryMode::Sonar);
        let deep = plan_key("compare TSLA and F", QueryMode::DeepResearch);
        assert_ne!(sonar, deep);

        // Case and whitespace variance collapse to the same key.
        assert_eq!(
            plan_key("Compare  TSLA and F", QueryMode::Sonar),
            plan_key("compare tsla AND f", QueryMode::Sonar)
        );
    }

    #[test]
    fn test_result_key_param_order_invariant() {
        let a = result_key("stock_price", &json!({"ticker": "AAPL", "range": "1d"}));
        let b = result_key("stock_price", &json!({"range": "1d", "ticker": "AAPL"}));
        assert_eq!(a, b);

        let other = result_key("company_news", &json!({"ticker": "AAPL", "range": "1d"}));
        assert_ne!(a, other);
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip_and_expiry() {
        let cache = InMemoryCache::new();

        cache
            .put("k", json!({"answer": 42}), Duration::from_millis(40))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"answer": 42})));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        // The expired entry was lazily removed.
        assert!(cache.entries.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_evict() {
        let cache = InMemoryCache::new();
        cache
            .put("k", json!(1), Duration::from_secs(60))
            .await
            .unwrap();
        cache.evict("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_noop_cache_always_misses() {
        let cache = NoopCache;
        cache
            .put("k", json!(1), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
