//! HTTP surface: axum router and handlers for the essential endpoints
//! of the external interface. Authentication itself is an out-of-scope
//! collaborator (§1); callers are identified by an `X-User-Id` header
//! when present, mirroring how a real gateway would forward a verified
//! identity downstream.

use crate::error::{ApiError, ApiResult};
use crate::types::{Goal, Tier};
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions/generate", post(generate_session))
        .route("/api/sessions/create", post(create_custom_session))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:id/playlist", get(get_playlist))
        .route("/api/sessions/:id/favorite", patch(toggle_favorite))
        .route("/api/sessions/:id", patch(update_session))
        .route("/api/sessions/:id", delete(delete_session))
        .route("/api/sessions/:id/feedback", post(submit_feedback))
        .route("/api/preferences", get(get_preferences))
        .route("/api/preferences", patch(update_preferences))
        .route("/api/subscription", get(get_subscription))
        .route("/api/subscription/verify-purchase", post(verify_purchase))
}

fn user_id(headers: &HeaderMap) -> Option<String> {
    headers.get("x-user-id").and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

fn require_user_id(headers: &HeaderMap) -> ApiResult<String> {
    user_id(headers).ok_or_else(|| ApiError::Unauthorized("missing X-User-Id".to_string()))
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(rename = "buildTimestamp")]
    pub build_timestamp: String,
    #[serde(rename = "cacheBackend")]
    pub cache_backend: String,
    #[serde(rename = "ttsConfigured")]
    pub tts_configured: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        cache_backend: state.tts.cache_backend().to_string(),
        tts_configured: state.tts.is_configured(),
    })
}

#[derive(Debug, Deserialize)]
pub struct GenerateSessionRequest {
    pub goal: String,
    #[serde(rename = "customPrompt")]
    pub custom_prompt: Option<String>,
    #[serde(rename = "binauralCategory")]
    pub binaural_category: Option<String>,
    #[serde(rename = "binauralHz")]
    pub binaural_hz: Option<f64>,
}

async fn generate_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<GenerateSessionRequest>,
) -> ApiResult<Json<crate::types::SessionResponse>> {
    let goal = Goal::parse(&body.goal).ok_or_else(|| ApiError::Validation(format!("unknown goal {}", body.goal)))?;
    let uid = user_id(&headers);
    let ip = client_ip(&headers);

    let is_first_session = match &uid {
        Some(id) => state.session_assembler.list_sessions(id).await?.is_empty(),
        None => true,
    };

    let response = state
        .orchestrator
        .generate_session(
            uid.as_deref(),
            &ip,
            goal,
            body.custom_prompt.as_deref(),
            body.binaural_category,
            body.binaural_hz,
            is_first_session,
        )
        .await?;

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct CreateCustomSessionRequest {
    pub title: String,
    #[serde(rename = "binauralCategory")]
    pub binaural_category: Option<String>,
    #[serde(rename = "binauralHz")]
    pub binaural_hz: Option<f64>,
    pub affirmations: Vec<String>,
    pub goal: Option<String>,
}

async fn create_custom_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateCustomSessionRequest>,
) -> ApiResult<Json<crate::types::SessionResponse>> {
    let uid = require_user_id(&headers)?;
    let ip = client_ip(&headers);

    let response = state
        .orchestrator
        .create_custom_session(
            &uid,
            &ip,
            &body.title,
            &body.affirmations,
            body.goal,
            body.binaural_category,
            body.binaural_hz,
        )
        .await?;

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<serde_json::Value>,
}

async fn list_sessions(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<ListSessionsResponse>> {
    let uid = require_user_id(&headers)?;
    let owned = state.session_assembler.list_sessions(&uid).await?;

    let mut sessions: Vec<serde_json::Value> = owned
        .into_iter()
        .map(|s| {
            serde_json::json!({
                "sessionId": s.id,
                "title": s.title,
                "goal": s.goal,
                "voiceId": s.voice_id,
                "pace": s.pace_id,
                "noise": s.background_noise,
                "lengthSec": s.length_sec,
                "isFavorite": s.is_favorite,
                "binauralCategory": s.binaural_category,
                "binauralHz": s.binaural_hz,
            })
        })
        .collect();

    for entry in crate::catalog::DEFAULT_SESSIONS {
        sessions.push(serde_json::json!({
            "sessionId": entry.id,
            "title": entry.title,
            "goal": entry.goal,
            "voiceId": entry.voice_id,
            "pace": entry.pace_id,
            "noise": entry.background_noise,
            "binauralCategory": entry.binaural_category,
            "binauralHz": entry.binaural_hz,
            "isDefault": true,
        }));
    }

    Ok(Json(ListSessionsResponse { sessions }))
}

async fn get_playlist(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<crate::types::Playlist>> {
    let uid = user_id(&headers);
    let tier = match &uid {
        Some(u) => Tier::parse(&state.subscription.get(u).await?.tier),
        None => Tier::Free,
    };
    let playlist = state.orchestrator.get_playlist(&id, uid.as_deref(), tier).await?;
    Ok(Json(playlist))
}

#[derive(Debug, Deserialize)]
pub struct ToggleFavoriteRequest {
    #[serde(rename = "isFavorite")]
    pub is_favorite: bool,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

async fn toggle_favorite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ToggleFavoriteRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    let uid = require_user_id(&headers)?;
    state.session_assembler.toggle_favorite(&id, &uid, body.is_favorite).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub title: Option<String>,
}

async fn update_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateSessionRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    let uid = require_user_id(&headers)?;
    state.session_assembler.update_session(&id, &uid, body.title.as_deref()).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn delete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    let uid = require_user_id(&headers)?;
    state.session_assembler.delete_session(&id, &uid).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub rating: i64,
    #[serde(rename = "wasReplayed")]
    pub was_replayed: Option<bool>,
}

async fn submit_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<FeedbackRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    let uid = user_id(&headers);
    state.generation_log.rate(&id, uid.as_deref(), body.rating, body.was_replayed).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Serialize)]
pub struct PreferencesResponse {
    #[serde(rename = "voiceId")]
    pub voice_id: String,
    #[serde(rename = "paceId")]
    pub pace_id: String,
    #[serde(rename = "backgroundNoise")]
    pub background_noise: String,
    #[serde(rename = "affirmationSpacingSec")]
    pub affirmation_spacing_sec: i64,
}

async fn get_preferences(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<PreferencesResponse>> {
    let uid = require_user_id(&headers)?;
    let prefs = state.preferences.get(&uid).await?;
    Ok(Json(PreferencesResponse {
        voice_id: prefs.voice_id,
        pace_id: prefs.pace_id,
        background_noise: prefs.background_noise,
        affirmation_spacing_sec: prefs.affirmation_spacing_sec,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePreferencesRequest {
    #[serde(rename = "voiceId")]
    pub voice_id: String,
    #[serde(rename = "paceId")]
    pub pace_id: String,
    #[serde(rename = "backgroundNoise")]
    pub background_noise: String,
    #[serde(rename = "affirmationSpacingSec")]
    pub affirmation_spacing_sec: i64,
}

async fn update_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<UpdatePreferencesRequest>,
) -> ApiResult<Json<PreferencesResponse>> {
    let uid = require_user_id(&headers)?;
    let prefs = state
        .preferences
        .upsert(&uid, &body.voice_id, &body.pace_id, &body.background_noise, body.affirmation_spacing_sec)
        .await?;
    Ok(Json(PreferencesResponse {
        voice_id: prefs.voice_id,
        pace_id: prefs.pace_id,
        background_noise: prefs.background_noise,
        affirmation_spacing_sec: prefs.affirmation_spacing_sec,
    }))
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub tier: String,
    pub status: String,
    #[serde(rename = "customSessionsUsedThisMonth")]
    pub custom_sessions_used_this_month: i64,
    #[serde(rename = "cancelAtPeriodEnd")]
    pub cancel_at_period_end: bool,
}

async fn get_subscription(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<SubscriptionResponse>> {
    let uid = require_user_id(&headers)?;
    let sub = state.subscription.get(&uid).await?;
    Ok(Json(SubscriptionResponse {
        tier: sub.tier,
        status: sub.status,
        custom_sessions_used_this_month: sub.custom_sessions_used_this_month,
        cancel_at_period_end: sub.cancel_at_period_end,
    }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyPurchaseRequest {
    #[serde(rename = "productId")]
    pub product_id: String,
    pub platform: String,
}

async fn verify_purchase(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<VerifyPurchaseRequest>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let uid = require_user_id(&headers)?;
    let billing_period = if body.product_id.contains("annual") { "annual" } else { "monthly" };
    if body.platform.is_empty() {
        return Err(ApiError::Validation("platform is required".to_string()));
    }
    let sub = state.subscription.verify_purchase(&uid, billing_period).await?;
    Ok(Json(SubscriptionResponse {
        tier: sub.tier,
        status: sub.status,
        custom_sessions_used_this_month: sub.custom_sessions_used_this_month,
        cancel_at_period_end: sub.cancel_at_period_end,
    }))
}
