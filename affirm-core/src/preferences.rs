//! Per-user playback preferences backing `/api/preferences` and the
//! Session Assembler's voice fallback (§4.7 "the owner's stored
//! preference"). Not named as its own entity in the data model, but
//! required by the preference CRUD endpoint in the HTTP surface.

use crate::error::ApiError;
use crate::types::SPACING_PRESETS_SEC;
use affirm_common::db::UserPreferenceRow;
use sqlx::SqlitePool;

pub struct PreferenceStore {
    db: SqlitePool,
}

impl PreferenceStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn get(&self, user_id: &str) -> Result<UserPreferenceRow, ApiError> {
        if let Some(row) = sqlx::query_as::<_, UserPreferenceRow>(
            "SELECT * FROM user_preferences WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        {
            return Ok(row);
        }

        Ok(UserPreferenceRow {
            user_id: user_id.to_string(),
            voice_id: "neutral".to_string(),
            pace_id: "normal".to_string(),
            background_noise: "rain".to_string(),
            affirmation_spacing_sec: crate::types::DEFAULT_SPACING_SEC as i64,
        })
    }

    pub async fn upsert(
        &self,
        user_id: &str,
        voice_id: &str,
        pace_id: &str,
        background_noise: &str,
        affirmation_spacing_sec: i64,
    ) -> Result<UserPreferenceRow, ApiError> {
        if !SPACING_PRESETS_SEC.contains(&(affirmation_spacing_sec as u32)) {
            return Err(ApiError::Validation(format!(
                "affirmationSpacingSec must be one of {SPACING_PRESETS_SEC:?}"
            )));
        }

        sqlx::query(
            "INSERT INTO user_preferences (user_id, voice_id, pace_id, background_noise, affirmation_spacing_sec)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (user_id) DO UPDATE SET
                voice_id = excluded.voice_id,
                pace_id = excluded.pace_id,
                background_noise = excluded.background_noise,
                affirmation_spacing_sec = excluded.affirmation_spacing_sec",
        )
        .bind(user_id)
        .bind(voice_id)
        .bind(pace_id)
        .bind(background_noise)
        .bind(affirmation_spacing_sec)
        .execute(&self.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

        self.get(user_id).await
    }
}
