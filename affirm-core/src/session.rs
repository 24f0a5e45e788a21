//! Session Assembler (C7): builds sessions, junction rows, silence
//! timing, and exposes the playback playlist.

use crate::catalog;
use crate::error::ApiError;
use crate::library::LibraryStore;
use crate::matcher::{MatchOutcome, Matcher};
use crate::preferences::PreferenceStore;
use crate::tts::TtsMaterializer;
use crate::types::{AffirmationSegment, Goal, Pace, Playlist, SessionResponse, Tier};
use affirm_common::db::AffirmationSessionRow;
use affirm_common::uuid_utils;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct SessionAssembler {
    db: SqlitePool,
    library: Arc<LibraryStore>,
    matcher: Arc<Matcher>,
    tts: Arc<TtsMaterializer>,
    preferences: Arc<PreferenceStore>,
}

pub struct GoalSessionResult {
    pub response: SessionResponse,
    pub outcome: MatchOutcome,
    pub session_id: String,
}

const MIN_CUSTOM_AFFIRMATIONS: usize = 1;
const MAX_CUSTOM_AFFIRMATIONS: usize = 32;

impl SessionAssembler {
    pub fn new(
        db: SqlitePool,
        library: Arc<LibraryStore>,
        matcher: Arc<Matcher>,
        tts: Arc<TtsMaterializer>,
        preferences: Arc<PreferenceStore>,
    ) -> Self {
        Self { db, library, matcher, tts, preferences }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_from_goal(
        &self,
        user_id: Option<&str>,
        ip: &str,
        goal: Goal,
        custom_prompt: Option<&str>,
        binaural_category: Option<String>,
        binaural_hz: Option<f64>,
        is_first_session: bool,
    ) -> Result<GoalSessionResult, ApiError> {
        let (voice_id, pace, noise, silence_between_ms) = match user_id {
            Some(uid) => {
                let prefs = self.preferences.get(uid).await?;
                (prefs.voice_id, Pace::parse(&prefs.pace_id), prefs.background_noise, prefs.affirmation_spacing_sec * 1000)
            }
            None => ("neutral".to_string(), Pace::Normal, "rain".to_string(), 8000),
        };

        let intention = custom_prompt
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("I want help with {}", goal.as_str()));

        let outcome = self.matcher.decide(&intention, goal.as_str(), is_first_session, user_id, ip).await?;
        let lines = self.ensure_affirmation_lines(&outcome, goal.as_str()).await?;

        if let Some(uid) = user_id {
            for (id, text) in &lines {
                if let Err(e) = self.tts.materialize(id, text, &voice_id, pace, Some(uid), ip).await {
                    tracing::warn!("materialize failed for affirmation {id}, playlist will surface null audio: {e}");
                }
            }
        }

        let binaural_category = binaural_category.or_else(|| Some(goal.default_binaural_category().to_string()));
        let length_sec = (180.0 * pace.duration_multiplier()).round() as i64;
        let title = format!("{} Session — {}", goal.capitalized(), chrono::Utc::now().format("%b %-d, %Y"));
        let session_id = uuid_utils::generate().to_string();

        if user_id.is_some() {
            self.persist_session(
                &session_id,
                user_id,
                goal.as_str(),
                &title,
                &voice_id,
                pace.as_str(),
                &noise,
                binaural_category.as_deref(),
                binaural_hz,
                length_sec,
                silence_between_ms,
                &lines,
            )
            .await?;
        }

        let response = SessionResponse {
            session_id: session_id.clone(),
            title,
            affirmations: lines.iter().map(|(_, text)| text.clone()).collect(),
            goal: goal.as_str().to_string(),
            voice_id,
            pace: pace.as_str().to_string(),
            noise,
            length_sec,
            binaural_category,
            binaural_hz,
        };

        Ok(GoalSessionResult { response, outcome, session_id })
    }

    pub async fn create_custom(
        &self,
        user_id: &str,
        title: &str,
        affirmations: &[String],
        goal: Option<String>,
        binaural_category: Option<String>,
        binaural_hz: Option<f64>,
    ) -> Result<SessionResponse, ApiError> {
        if affirmations.len() < MIN_CUSTOM_AFFIRMATIONS || affirmations.len() > MAX_CUSTOM_AFFIRMATIONS {
            return Err(ApiError::Validation(format!(
                "affirmations must contain {MIN_CUSTOM_AFFIRMATIONS}..{MAX_CUSTOM_AFFIRMATIONS} entries"
            )));
        }

        let prefs = self.preferences.get(user_id).await?;
        let pace = Pace::parse(&prefs.pace_id);
        let goal = goal.unwrap_or_else(|| "manifest".to_string());

        let mut lines = Vec::with_capacity(affirmations.len());
        for text in affirmations {
            let line = self.library.create_affirmation(text, &goal, &[], None).await?;
            lines.push((line.id, line.text));
        }

        let session_id = uuid_utils::generate().to_string();
        let length_sec = (30.0 * affirmations.len() as f64 * pace.duration_multiplier()).round() as i64;
        let silence_between_ms = prefs.affirmation_spacing_sec * 1000;

        self.persist_session(
            &session_id,
            Some(user_id),
            &goal,
            title,
            &prefs.voice_id,
            pace.as_str(),
            &prefs.background_noise,
            binaural_category.as_deref(),
            binaural_hz,
            length_sec,
            silence_between_ms,
            &lines,
        )
        .await?;

        Ok(SessionResponse {
            session_id,
            title: title.to_string(),
            affirmations: lines.iter().map(|(_, text)| text.clone()).collect(),
            goal,
            voice_id: prefs.voice_id,
            pace: pace.as_str().to_string(),
            noise: prefs.background_noise,
            length_sec,
            binaural_category,
            binaural_hz,
        })
    }

    async fn ensure_affirmation_lines(
        &self,
        outcome: &MatchOutcome,
        goal: &str,
    ) -> Result<Vec<(String, String)>, ApiError> {
        match outcome {
            MatchOutcome::Exact { affirmation_ids, affirmations, .. }
            | MatchOutcome::Pooled { affirmation_ids, affirmations, .. } => {
                Ok(affirmation_ids.iter().cloned().zip(affirmations.iter().cloned()).collect())
            }
            MatchOutcome::Generated { affirmations, .. } | MatchOutcome::Fallback { affirmations } => {
                let mut lines = Vec::with_capacity(affirmations.len());
                for text in affirmations {
                    let line = self.library.create_affirmation(text, goal, &[], None).await?;
                    lines.push((line.id, line.text));
                }
                Ok(lines)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_session(
        &self,
        session_id: &str,
        owner_user_id: Option<&str>,
        goal: &str,
        title: &str,
        voice_id: &str,
        pace_id: &str,
        noise: &str,
        binaural_category: Option<&str>,
        binaural_hz: Option<f64>,
        length_sec: i64,
        silence_between_ms: i64,
        lines: &[(String, String)],
    ) -> Result<(), ApiError> {
        let mut tx = self.db.begin().await.map_err(|e| ApiError::Internal(e.to_string()))?;
        let created_at = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO affirmation_sessions
                (id, owner_user_id, goal, title, voice_id, pace_id, background_noise, binaural_category, binaural_hz, length_sec, silence_between_ms, is_favorite, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(session_id)
        .bind(owner_user_id)
        .bind(goal)
        .bind(title)
        .bind(voice_id)
        .bind(pace_id)
        .bind(noise)
        .bind(binaural_category)
        .bind(binaural_hz)
        .bind(length_sec)
        .bind(silence_between_ms)
        .bind(&created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

        let last = lines.len().saturating_sub(1);
        for (position, (affirmation_id, _text)) in lines.iter().enumerate() {
            let silence_after_ms = if position == last { 0 } else { silence_between_ms };
            sqlx::query(
                "INSERT INTO session_affirmations (session_id, affirmation_id, position, silence_after_ms)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(session_id)
            .bind(affirmation_id)
            .bind((position + 1) as i64)
            .bind(silence_after_ms)
            .execute(&mut *tx)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(())
    }

    pub async fn get_playlist(
        &self,
        session_id: &str,
        requesting_user_id: Option<&str>,
        requesting_tier: Tier,
    ) -> Result<Playlist, ApiError> {
        if catalog::is_default_id(session_id) {
            let entry = catalog::find(session_id).ok_or_else(|| ApiError::NotFound(session_id.to_string()))?;
            return Ok(Playlist {
                session_id: entry.id.to_string(),
                total_duration_ms: 0,
                silence_between_ms: 0,
                affirmations: Vec::new(),
                binaural_category: Some(entry.binaural_category.to_string()),
                binaural_hz: Some(entry.binaural_hz),
                background_noise: Some(entry.background_noise.to_string()),
            });
        }

        let session = self.load_session(session_id).await?;
        if let Some(owner) = &session.owner_user_id {
            if Some(owner.as_str()) != requesting_user_id {
                return Err(ApiError::Forbidden("not the session owner".to_string()));
            }
        }

        let junctions = self.load_junctions(session_id).await?;
        let affirmation_ids: Vec<String> = junctions.iter().map(|j| j.1.clone()).collect();
        let lines = self.library.get_affirmations_by_ids(&affirmation_ids).await?;
        let audio = self.library.get_audio_batch(&affirmation_ids).await?;

        let preferred_voice = match requesting_user_id {
            Some(uid) => self.preferences.get(uid).await?.voice_id,
            None => session.voice_id.clone(),
        };
        let allowed = requesting_tier.allowed_voices();

        let mut segments = Vec::with_capacity(junctions.len());
        let mut total_duration_ms = 0i64;

        for (_position, affirmation_id, silence_after_ms) in &junctions {
            let text = lines
                .iter()
                .find(|l| &l.id == affirmation_id)
                .map(|l| l.text.clone())
                .unwrap_or_default();

            let resolved = resolve_voice_for_affirmation(affirmation_id, &preferred_voice, &session.pace_id, allowed, &audio);

            let (audio_url, duration_ms, resolved_voice) = match resolved {
                Some((row, voice)) => (Some(row.url.clone()), row.duration_ms, Some(voice)),
                None => (None, 0, None),
            };

            total_duration_ms += duration_ms + silence_after_ms;

            segments.push(AffirmationSegment {
                id: affirmation_id.clone(),
                text,
                audio_url,
                duration_ms,
                silence_after_ms: *silence_after_ms,
                voice_id: resolved_voice,
            });
        }

        Ok(Playlist {
            session_id: session.id,
            total_duration_ms,
            silence_between_ms: session.silence_between_ms,
            affirmations: segments,
            binaural_category: session.binaural_category,
            binaural_hz: session.binaural_hz,
            background_noise: Some(session.background_noise),
        })
    }

    pub async fn toggle_favorite(&self, session_id: &str, user_id: &str, is_favorite: bool) -> Result<(), ApiError> {
        if catalog::is_default_id(session_id) {
            return Err(ApiError::Forbidden("default sessions are immutable".to_string()));
        }
        let session = self.load_session(session_id).await?;
        self.require_owner(&session, user_id)?;

        sqlx::query("UPDATE affirmation_sessions SET is_favorite = ? WHERE id = ?")
            .bind(is_favorite)
            .bind(session_id)
            .execute(&self.db)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(())
    }

    pub async fn update_session(&self, session_id: &str, user_id: &str, title: Option<&str>) -> Result<(), ApiError> {
        if catalog::is_default_id(session_id) {
            return Err(ApiError::Forbidden("default sessions are immutable".to_string()));
        }
        let session = self.load_session(session_id).await?;
        self.require_owner(&session, user_id)?;

        if let Some(title) = title {
            sqlx::query("UPDATE affirmation_sessions SET title = ? WHERE id = ?")
                .bind(title)
                .bind(session_id)
                .execute(&self.db)
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn delete_session(&self, session_id: &str, user_id: &str) -> Result<(), ApiError> {
        if catalog::is_default_id(session_id) {
            return Err(ApiError::Forbidden("default sessions are immutable".to_string()));
        }
        let session = self.load_session(session_id).await?;
        self.require_owner(&session, user_id)?;

        let mut tx = self.db.begin().await.map_err(|e| ApiError::Internal(e.to_string()))?;
        sqlx::query("DELETE FROM session_affirmations WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        sqlx::query("DELETE FROM affirmation_sessions WHERE id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        tx.commit().await.map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(())
    }

    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<AffirmationSessionRow>, ApiError> {
        let rows = sqlx::query_as::<_, AffirmationSessionRow>(
            "SELECT * FROM affirmation_sessions WHERE owner_user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(rows)
    }

    fn require_owner(&self, session: &AffirmationSessionRow, user_id: &str) -> Result<(), ApiError> {
        match &session.owner_user_id {
            Some(owner) if owner == user_id => Ok(()),
            Some(_) => Err(ApiError::Forbidden("not the session owner".to_string())),
            None => Err(ApiError::Forbidden("session has no owner".to_string())),
        }
    }

    async fn load_session(&self, session_id: &str) -> Result<AffirmationSessionRow, ApiError> {
        sqlx::query_as::<_, AffirmationSessionRow>("SELECT * FROM affirmation_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .ok_or_else(|| ApiError::NotFound(session_id.to_string()))
    }

    /// Returns `(position, affirmationId, silenceAfterMs)` ordered by position.
    async fn load_junctions(&self, session_id: &str) -> Result<Vec<(i64, String, i64)>, ApiError> {
        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            "SELECT position, affirmation_id, silence_after_ms FROM session_affirmations WHERE session_id = ? ORDER BY position",
        )
        .bind(session_id)
        .fetch_all(&self.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(rows)
    }
}

/// Preferred → first allowed voice with an artifact → any artifact present.
fn resolve_voice_for_affirmation<'a>(
    affirmation_id: &str,
    preferred_voice: &str,
    pace_id: &str,
    allowed: &[&str],
    audio: &'a std::collections::HashMap<(String, String, String), affirm_common::db::AffirmationAudioRow>,
) -> Option<(&'a affirm_common::db::AffirmationAudioRow, String)> {
    if allowed.contains(&preferred_voice) {
        if let Some(row) = audio.get(&(affirmation_id.to_string(), preferred_voice.to_string(), pace_id.to_string())) {
            return Some((row, preferred_voice.to_string()));
        }
    }

    for voice in allowed {
        if let Some(row) = audio.get(&(affirmation_id.to_string(), voice.to_string(), pace_id.to_string())) {
            return Some((row, voice.to_string()));
        }
    }

    audio
        .iter()
        .find(|((aff_id, _, _), _)| aff_id == affirmation_id)
        .map(|((_, voice, _), row)| (row, voice.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_voice_falls_back_to_any_artifact() {
        let mut audio = std::collections::HashMap::new();
        audio.insert(
            ("aff-1".to_string(), "neutral".to_string(), "normal".to_string()),
            affirm_common::db::AffirmationAudioRow {
                id: "a1".to_string(),
                affirmation_id: "aff-1".to_string(),
                voice_id: "neutral".to_string(),
                pace_id: "normal".to_string(),
                url: "https://x/1".to_string(),
                duration_ms: 4000,
                bytes: 1,
                content_type: "audio/mpeg".to_string(),
            },
        );

        let resolved = resolve_voice_for_affirmation("aff-1", "premium1", "normal", &["neutral"], &audio);
        assert!(resolved.is_some());
        assert_eq!(resolved.unwrap().1, "neutral");
    }
}
