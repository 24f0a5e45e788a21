//! Fixed-window rate limiter (C2), sharing the Redis-or-memory backing
//! idea behind the KV cache but needing true atomic increments, so it
//! keeps its own connection handling rather than routing through
//! `KvCache`: Redis's `INCR` returning 1 on first-touch of a key is
//! itself the atomic compare-and-set the fixed window needs, paired
//! with `EXPIRE` to bound the window. The in-memory fallback mirrors
//! this with a `dashmap` entry per key, each guarded by its own mutex
//! (a "mutex per key shard", per the design notes).

use dashmap::DashMap;
use redis::AsyncCommands;
use std::sync::{Arc, Mutex as StdMutex};
use tracing::warn;

pub struct AllowResult {
    pub allowed: bool,
    pub remaining: i64,
    pub reset_at_epoch_sec: i64,
}

struct WindowState {
    count: i64,
    reset_at_epoch_sec: i64,
}

pub struct RateLimiter {
    redis: Option<redis::Client>,
    memory: DashMap<String, Arc<StdMutex<WindowState>>>,
}

/// A preconfigured rate-limit class (§4.2).
pub struct LimitClass {
    pub name: &'static str,
    pub window_secs: i64,
    pub limit: i64,
}

pub const TTS_CLASS: LimitClass = LimitClass { name: "tts", window_secs: 15 * 60, limit: 10 };
pub const LLM_CLASS: LimitClass = LimitClass { name: "llm", window_secs: 60 * 60, limit: 20 };
pub const API_CLASS: LimitClass = LimitClass { name: "api", window_secs: 15 * 60, limit: 100 };

/// `"{class}:user:{userId}"` if authenticated, else `"{class}:ip:{ip}"`.
pub fn rate_limit_key(class: &str, user_id: Option<&str>, ip: &str) -> String {
    match user_id {
        Some(uid) => format!("{class}:user:{uid}"),
        None => format!("{class}:ip:{ip}"),
    }
}

fn now_epoch_sec() -> i64 {
    chrono::Utc::now().timestamp()
}

impl RateLimiter {
    pub fn new(redis_url: Option<&str>) -> Self {
        let redis = redis_url.and_then(|url| match redis::Client::open(url) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("failed to build redis client for rate limiter, using in-memory only: {e}");
                None
            }
        });

        Self { redis, memory: DashMap::new() }
    }

    pub async fn allow(&self, key: &str, window_secs: i64, limit: i64) -> AllowResult {
        if let Some(result) = self.allow_redis(key, window_secs, limit).await {
            return result;
        }
        self.allow_memory(key, window_secs, limit)
    }

    async fn allow_redis(&self, key: &str, window_secs: i64, limit: i64) -> Option<AllowResult> {
        let client = self.redis.as_ref()?;
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("rate limiter redis connection failed, falling back to memory: {e}");
                return None;
            }
        };

        let count: i64 = match conn.incr(key, 1).await {
            Ok(count) => count,
            Err(e) => {
                warn!("rate limiter redis INCR failed for {key}, falling back to memory: {e}");
                return None;
            }
        };

        if count == 1 {
            let _: redis::RedisResult<()> = conn.expire(key, window_secs).await;
        }

        let ttl: i64 = conn.ttl(key).await.unwrap_or(window_secs);
        let reset_at_epoch_sec = now_epoch_sec() + ttl.max(0);

        Some(AllowResult {
            allowed: count <= limit,
            remaining: (limit - count).max(0),
            reset_at_epoch_sec,
        })
    }

    fn allow_memory(&self, key: &str, window_secs: i64, limit: i64) -> AllowResult {
        let slot = self
            .memory
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(StdMutex::new(WindowState { count: 0, reset_at_epoch_sec: 0 })))
            .clone();
        let mut state = slot.lock().unwrap();

        let now = now_epoch_sec();
        if now >= state.reset_at_epoch_sec {
            state.count = 1;
            state.reset_at_epoch_sec = now + window_secs;
        } else {
            state.count += 1;
        }

        AllowResult {
            allowed: state.count <= limit,
            remaining: (limit - state.count).max(0),
            reset_at_epoch_sec: state.reset_at_epoch_sec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_limit_then_denies() {
        let limiter = RateLimiter::new(None);

        for i in 1..=5 {
            let result = limiter.allow("k", 60, 5).await;
            assert!(result.allowed, "request {i} should be allowed");
        }

        let sixth = limiter.allow("k", 60, 5).await;
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);
    }

    #[tokio::test]
    async fn window_boundary_starts_new_window() {
        let limiter = RateLimiter::new(None);
        {
            let slot = limiter
                .memory
                .entry("k".to_string())
                .or_insert_with(|| Arc::new(StdMutex::new(WindowState { count: 5, reset_at_epoch_sec: 0 })))
                .clone();
            let mut state = slot.lock().unwrap();
            state.count = 5;
            state.reset_at_epoch_sec = now_epoch_sec();
        }

        let result = limiter.allow("k", 60, 5).await;
        assert!(result.allowed);
        assert_eq!(result.remaining, 4);
    }

    #[test]
    fn key_derivation_prefers_user_id() {
        assert_eq!(rate_limit_key("tts", Some("u1"), "1.2.3.4"), "tts:user:u1");
        assert_eq!(rate_limit_key("tts", None, "1.2.3.4"), "tts:ip:1.2.3.4");
    }
}
