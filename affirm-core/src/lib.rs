//! Library interface for the affirmation-session pipeline, exposed for
//! integration testing and reuse by the binary entrypoint.

pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod generation_log;
pub mod library;
pub mod llm;
pub mod matcher;
pub mod orchestrator;
pub mod preferences;
pub mod rate_limiter;
pub mod session;
pub mod subscription;
pub mod tts;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use crate::cache::KvCache;
use crate::config::Config;
use crate::generation_log::GenerationLog;
use crate::library::LibraryStore;
use crate::llm::{HttpLlmClient, LlmClient};
use crate::matcher::Matcher;
use crate::orchestrator::PipelineOrchestrator;
use crate::preferences::PreferenceStore;
use crate::rate_limiter::RateLimiter;
use crate::session::SessionAssembler;
use crate::subscription::SubscriptionGate;
use crate::tts::{BlobStore, HttpTtsProvider, ObjectStoreBlobs, TtsMaterializer, TtsProvider};
use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application state shared across HTTP handlers: one `Arc<...>` per
/// pipeline component (C1-C10), wired together in `build_state`.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub library: Arc<LibraryStore>,
    pub matcher: Arc<Matcher>,
    pub tts: Arc<TtsMaterializer>,
    pub preferences: Arc<PreferenceStore>,
    pub subscription: Arc<SubscriptionGate>,
    pub session_assembler: Arc<SessionAssembler>,
    pub generation_log: Arc<GenerationLog>,
    pub rate_limiter: Arc<RateLimiter>,
    pub orchestrator: Arc<PipelineOrchestrator>,
}

/// Wires every component from a database pool and resolved config. No
/// business logic of its own: this is where C1-C10 get constructed and
/// handed to each other, the same main-owns-the-graph shape the
/// teacher's service binaries wire their components with.
pub async fn build_state(db: SqlitePool, config: &Config) -> AppState {
    let cache = KvCache::new(config.kv_url.as_deref());
    let rate_limiter = Arc::new(RateLimiter::new(config.kv_url.as_deref()));
    let library = Arc::new(LibraryStore::new(db.clone()));
    let preferences = Arc::new(PreferenceStore::new(db.clone()));
    let subscription = Arc::new(SubscriptionGate::new(db.clone()));
    let generation_log = Arc::new(GenerationLog::new(db.clone()));

    let llm_api_key = crate::config::resolve_llm_api_key(&db, config).await;
    let llm: Option<Arc<dyn LlmClient>> = llm_api_key.map(|key| Arc::new(HttpLlmClient::new(key)) as Arc<dyn LlmClient>);
    let matcher = Arc::new(Matcher::new(Arc::clone(&library), llm, Arc::clone(&rate_limiter)));

    let tts_api_key = crate::config::resolve_tts_api_key(&db, config).await;
    let tts_provider: Option<Arc<dyn TtsProvider>> =
        tts_api_key.map(|key| Arc::new(HttpTtsProvider::new(key)) as Arc<dyn TtsProvider>);
    let blobs: Arc<dyn BlobStore> = Arc::new(ObjectStoreBlobs::new(
        config.object_storage_endpoint.clone().unwrap_or_else(|| "https://blobs.local".to_string()),
    ));
    let tts = Arc::new(TtsMaterializer::new(Arc::clone(&library), cache, tts_provider, blobs, Arc::clone(&rate_limiter)));

    let session_assembler = Arc::new(SessionAssembler::new(
        db.clone(),
        Arc::clone(&library),
        Arc::clone(&matcher),
        Arc::clone(&tts),
        Arc::clone(&preferences),
    ));

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        Arc::clone(&rate_limiter),
        Arc::clone(&subscription),
        Arc::clone(&session_assembler),
        Arc::clone(&generation_log),
    ));

    AppState {
        db,
        library,
        matcher,
        tts,
        preferences,
        subscription,
        session_assembler,
        generation_log,
        rate_limiter,
        orchestrator,
    }
}

pub fn build_router(state: AppState) -> Router {
    api::routes().with_state(state)
}
