//! Short-TTL KV cache (C1): Redis-backed with single-flight loading and
//! an in-memory fallback when the network store is unreachable.
//!
//! A `Mutex`-guarded per-key gate turns "wait before calling" into "only
//! one caller actually calls"; the in-memory fallback map keeps the
//! single-flight property even when Redis is unreachable.

use dashmap::DashMap;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

pub struct KvCache {
    redis: Option<redis::Client>,
    memory: DashMap<String, MemoryEntry>,
    flight_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl KvCache {
    pub fn new(redis_url: Option<&str>) -> Arc<Self> {
        let redis = redis_url.and_then(|url| match redis::Client::open(url) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("failed to build redis client, using in-memory cache only: {e}");
                None
            }
        });

        let cache = Arc::new(Self {
            redis,
            memory: DashMap::new(),
            flight_locks: DashMap::new(),
        });

        let sweep_target = Arc::clone(&cache);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5 * 60));
            loop {
                interval.tick().await;
                sweep_target.sweep_expired();
            }
        });

        cache
    }

    pub fn backend_kind(&self) -> &'static str {
        if self.redis.is_some() {
            "redis"
        } else {
            "memory"
        }
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        self.memory.retain(|_, entry| entry.expires_at > now);
    }

    async fn get_raw(&self, key: &str) -> Option<String> {
        if let Some(client) = &self.redis {
            match client.get_multiplexed_async_connection().await {
                Ok(mut conn) => match conn.get::<_, Option<String>>(key).await {
                    Ok(value) => return value,
                    Err(e) => warn!("redis GET failed for {key}, falling back to memory: {e}"),
                },
                Err(e) => warn!("redis connection failed, falling back to memory: {e}"),
            }
        }

        self.memory.get(key).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    async fn set_raw(&self, key: &str, value: &str, ttl_secs: u64) {
        if let Some(client) = &self.redis {
            match client.get_multiplexed_async_connection().await {
                Ok(mut conn) => {
                    let result: redis::RedisResult<()> = conn.set_ex(key, value, ttl_secs).await;
                    if let Err(e) = result {
                        warn!("redis SETEX failed for {key}, writing to memory instead: {e}");
                    } else {
                        return;
                    }
                }
                Err(e) => warn!("redis connection failed, writing to memory instead: {e}"),
            }
        }

        self.memory.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
    }

    pub async fn invalidate(&self, key: &str) {
        if let Some(client) = &self.redis {
            if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
                let _: redis::RedisResult<()> = conn.del(key).await;
            }
        }
        self.memory.remove(key);
    }

    /// Delete all keys whose name starts with `prefix`.
    pub async fn invalidate_prefix(&self, prefix: &str) {
        if let Some(client) = &self.redis {
            if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
                let pattern = format!("{prefix}*");
                if let Ok(keys) = conn.keys::<_, Vec<String>>(pattern).await {
                    if !keys.is_empty() {
                        let _: redis::RedisResult<()> = conn.del(keys).await;
                    }
                }
            }
        }
        self.memory.retain(|k, _| !k.starts_with(prefix));
    }

    /// `getOrLoad`: return a cached, non-expired value for `key`, or
    /// invoke `loader` under a per-key single-flight gate and cache its
    /// result for `ttl_secs`. Loader errors are never cached.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        key: &str,
        ttl_secs: u64,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(raw) = self.get_raw(key).await {
            if let Ok(value) = serde_json::from_str(&raw) {
                return Ok(value);
            }
        }

        let lock = self
            .flight_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(raw) = self.get_raw(key).await {
            if let Ok(value) = serde_json::from_str(&raw) {
                return Ok(value);
            }
        }

        let value = loader().await?;
        if let Ok(raw) = serde_json::to_string(&value) {
            self.set_raw(key, &raw, ttl_secs).await;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn get_or_load_caches_and_dedupes() {
        let cache = KvCache::new(None);
        let calls = Arc::new(AtomicUsize::new(0));

        let load = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::convert::Infallible>(42i32)
        };

        let first = cache.get_or_load("k", 60, || load(Arc::clone(&calls))).await.unwrap();
        let second = cache.get_or_load("k", 60, || load(Arc::clone(&calls))).await.unwrap();

        assert_eq!(first, 42);
        assert_eq!(second, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_get_or_load_single_flight() {
        let cache = Arc::new(KvCache::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load("fingerprint", 60, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, std::convert::Infallible>("audio-url".to_string())
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), "audio-url");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_prefix_removes_matching_keys() {
        let cache = KvCache::new(None);
        cache.set_raw("tts:a", "1", 60).await;
        cache.set_raw("tts:b", "2", 60).await;
        cache.set_raw("llm:a", "3", 60).await;

        cache.invalidate_prefix("tts:").await;

        assert!(cache.get_raw("tts:a").await.is_none());
        assert!(cache.get_raw("tts:b").await.is_none());
        assert!(cache.get_raw("llm:a").await.is_some());
    }
}
