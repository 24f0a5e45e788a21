//! Row models for the entities in the data model (affirmation lines,
//! templates, audio artifacts, sessions, subscriptions, generation log).
//!
//! JSON-shaped columns (tag lists, keyword lists, ordered affirmation-id
//! lists) are stored as TEXT and decoded by the owning store, not by
//! `FromRow` itself — keeps these structs a direct mirror of the schema.

use serde::{Deserialize, Serialize};

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct AffirmationLineRow {
    pub id: String,
    pub text: String,
    pub goal: String,
    pub emotion: Option<String>,
    /// JSON array of strings
    pub tags_json: String,
    pub rating: Option<f64>,
    pub use_count: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct SessionTemplateRow {
    pub id: String,
    pub title: String,
    pub goal: String,
    pub canonical_intent: String,
    /// JSON array of strings
    pub intent_keywords_json: String,
    /// JSON array of affirmation-line ids, ordered
    pub affirmation_ids_json: String,
    pub binaural_category: Option<String>,
    pub binaural_hz: Option<f64>,
    pub target_length_sec: i64,
    pub is_default: bool,
    pub rating: f64,
    pub use_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct AffirmationAudioRow {
    pub id: String,
    pub affirmation_id: String,
    pub voice_id: String,
    pub pace_id: String,
    pub url: String,
    pub duration_ms: i64,
    pub bytes: i64,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct AffirmationSessionRow {
    pub id: String,
    pub owner_user_id: Option<String>,
    pub goal: String,
    pub title: String,
    pub voice_id: String,
    pub pace_id: String,
    pub background_noise: String,
    pub binaural_category: Option<String>,
    pub binaural_hz: Option<f64>,
    pub length_sec: i64,
    pub silence_between_ms: i64,
    pub is_favorite: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct SessionAffirmationRow {
    pub session_id: String,
    pub affirmation_id: String,
    pub position: i64,
    pub silence_after_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct UserPreferenceRow {
    pub user_id: String,
    pub voice_id: String,
    pub pace_id: String,
    pub background_noise: String,
    pub affirmation_spacing_sec: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct UserSubscriptionRow {
    pub user_id: String,
    pub tier: String,
    pub status: String,
    pub billing_period: Option<String>,
    pub current_period_start: Option<String>,
    pub current_period_end: Option<String>,
    pub cancel_at_period_end: bool,
    pub custom_sessions_used_this_month: i64,
    pub last_reset_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct GenerationLogRow {
    pub id: String,
    pub user_id: Option<String>,
    pub user_intent: String,
    pub goal: String,
    pub match_type: String,
    pub confidence: f64,
    /// JSON array of affirmation ids or raw texts
    pub affirmations_used_json: String,
    pub template_id: Option<String>,
    /// Fixed-point cost, stored as its decimal string representation
    pub api_cost: String,
    pub session_id: Option<String>,
    pub created_at: String,
    pub was_rated: bool,
    pub user_rating: Option<i64>,
    pub was_replayed: Option<bool>,
}
