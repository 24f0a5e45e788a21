//! Library Store (C3): persistent CRUD over templates, affirmation
//! lines, and audio artifacts.

use crate::error::ApiError;
use affirm_common::db::{AffirmationAudioRow, AffirmationLineRow, SessionTemplateRow};
use affirm_common::uuid_utils;
use sqlx::SqlitePool;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("affirmation line is referenced by templates: {0:?}")]
    InUse(Vec<String>),
    #[error("default template cannot be deleted")]
    CannotDelete,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl From<LibraryError> for ApiError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::InUse(refs) => {
                ApiError::Conflict(format!("referenced by templates: {}", refs.join(", ")))
            }
            LibraryError::CannotDelete => {
                ApiError::Conflict("default template cannot be deleted".to_string())
            }
            LibraryError::Db(e) => ApiError::Internal(e.to_string()),
        }
    }
}

pub struct LibraryStore {
    db: SqlitePool,
}

impl LibraryStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn find_templates_by_goal(&self, goal: &str) -> Result<Vec<SessionTemplateRow>, LibraryError> {
        let rows = sqlx::query_as::<_, SessionTemplateRow>(
            "SELECT * FROM session_templates WHERE goal = ?",
        )
        .bind(goal)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn find_affirmations_by_goal(
        &self,
        goal: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AffirmationLineRow>, LibraryError> {
        let rows = sqlx::query_as::<_, AffirmationLineRow>(
            "SELECT * FROM affirmation_lines WHERE goal = ? ORDER BY created_at LIMIT ? OFFSET ?",
        )
        .bind(goal)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn get_affirmations_by_ids(&self, ids: &[String]) -> Result<Vec<AffirmationLineRow>, LibraryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = std::iter::repeat("?").take(ids.len()).collect::<Vec<_>>().join(",");
        let sql = format!("SELECT * FROM affirmation_lines WHERE id IN ({placeholders})");
        let mut query = sqlx::query_as::<_, AffirmationLineRow>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        Ok(query.fetch_all(&self.db).await?)
    }

    pub async fn create_affirmation(
        &self,
        text: &str,
        goal: &str,
        tags: &[String],
        emotion: Option<&str>,
    ) -> Result<AffirmationLineRow, LibraryError> {
        let id = uuid_utils::generate().to_string();
        let tags_json = serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string());
        let created_at = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO affirmation_lines (id, text, goal, emotion, tags_json, rating, use_count, created_at)
             VALUES (?, ?, ?, ?, ?, NULL, 0, ?)",
        )
        .bind(&id)
        .bind(text)
        .bind(goal)
        .bind(emotion)
        .bind(&tags_json)
        .bind(&created_at)
        .execute(&self.db)
        .await?;

        Ok(AffirmationLineRow {
            id,
            text: text.to_string(),
            goal: goal.to_string(),
            emotion: emotion.map(|s| s.to_string()),
            tags_json,
            rating: None,
            use_count: Some(0),
            created_at,
        })
    }

    pub async fn get_audio(
        &self,
        affirmation_id: &str,
        voice_id: &str,
        pace_id: &str,
    ) -> Result<Option<AffirmationAudioRow>, LibraryError> {
        let row = sqlx::query_as::<_, AffirmationAudioRow>(
            "SELECT * FROM affirmation_audio WHERE affirmation_id = ? AND voice_id = ? AND pace_id = ?",
        )
        .bind(affirmation_id)
        .bind(voice_id)
        .bind(pace_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    /// Batch-load every `AffirmationAudio` row for a set of affirmation
    /// IDs in one query, keyed by `(affirmationId, voiceId, paceId)`, as
    /// playlist assembly requires (§4.7).
    pub async fn get_audio_batch(
        &self,
        affirmation_ids: &[String],
    ) -> Result<HashMap<(String, String, String), AffirmationAudioRow>, LibraryError> {
        if affirmation_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = std::iter::repeat("?").take(affirmation_ids.len()).collect::<Vec<_>>().join(",");
        let sql = format!("SELECT * FROM affirmation_audio WHERE affirmation_id IN ({placeholders})");
        let mut query = sqlx::query_as::<_, AffirmationAudioRow>(&sql);
        for id in affirmation_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.db).await?;
        Ok(rows
            .into_iter()
            .map(|row| ((row.affirmation_id.clone(), row.voice_id.clone(), row.pace_id.clone()), row))
            .collect())
    }

    /// Idempotent on `(affirmationId, voiceId, paceId)`: a second write
    /// with the same composite key returns the existing row unchanged.
    pub async fn put_audio(
        &self,
        affirmation_id: &str,
        voice_id: &str,
        pace_id: &str,
        url: &str,
        duration_ms: i64,
        bytes: i64,
        content_type: &str,
    ) -> Result<AffirmationAudioRow, LibraryError> {
        if let Some(existing) = self.get_audio(affirmation_id, voice_id, pace_id).await? {
            return Ok(existing);
        }

        let id = uuid_utils::generate().to_string();
        let inserted = sqlx::query(
            "INSERT INTO affirmation_audio (id, affirmation_id, voice_id, pace_id, url, duration_ms, bytes, content_type)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (affirmation_id, voice_id, pace_id) DO NOTHING",
        )
        .bind(&id)
        .bind(affirmation_id)
        .bind(voice_id)
        .bind(pace_id)
        .bind(url)
        .bind(duration_ms)
        .bind(bytes)
        .bind(content_type)
        .execute(&self.db)
        .await?;

        if inserted.rows_affected() == 0 {
            // lost the race to a concurrent writer; adopt their row.
            return Ok(self
                .get_audio(affirmation_id, voice_id, pace_id)
                .await?
                .expect("row must exist after a conflicting insert"));
        }

        Ok(AffirmationAudioRow {
            id,
            affirmation_id: affirmation_id.to_string(),
            voice_id: voice_id.to_string(),
            pace_id: pace_id.to_string(),
            url: url.to_string(),
            duration_ms,
            bytes,
            content_type: content_type.to_string(),
        })
    }

    pub async fn delete_affirmation_if_unreferenced(&self, id: &str) -> Result<(), LibraryError> {
        let templates = sqlx::query_as::<_, SessionTemplateRow>("SELECT * FROM session_templates")
            .fetch_all(&self.db)
            .await?;

        let referencing: Vec<String> = templates
            .into_iter()
            .filter(|t| {
                serde_json::from_str::<Vec<String>>(&t.affirmation_ids_json)
                    .map(|ids| ids.iter().any(|aid| aid == id))
                    .unwrap_or(false)
            })
            .map(|t| t.id)
            .collect();

        if !referencing.is_empty() {
            return Err(LibraryError::InUse(referencing));
        }

        sqlx::query("DELETE FROM affirmation_lines WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    pub async fn delete_template(&self, id: &str) -> Result<(), LibraryError> {
        let template = sqlx::query_as::<_, SessionTemplateRow>("SELECT * FROM session_templates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        if let Some(template) = template {
            if template.is_default {
                return Err(LibraryError::CannotDelete);
            }
        }

        sqlx::query("DELETE FROM session_templates WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use affirm_common::db::init_database;

    async fn test_store() -> LibraryStore {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("test.db")).await.unwrap();
        std::mem::forget(dir);
        LibraryStore::new(pool)
    }

    #[tokio::test]
    async fn put_audio_is_idempotent() {
        let store = test_store().await;
        let first = store.put_audio("aff-1", "neutral", "normal", "https://x/1", 4000, 1024, "audio/mpeg").await.unwrap();
        let second = store.put_audio("aff-1", "neutral", "normal", "https://x/1", 4000, 1024, "audio/mpeg").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn delete_referenced_affirmation_fails_with_in_use() {
        let store = test_store().await;
        let line = store.create_affirmation("I am calm", "calm", &[], None).await.unwrap();

        sqlx::query(
            "INSERT INTO session_templates (id, title, goal, canonical_intent, intent_keywords_json, affirmation_ids_json, target_length_sec, is_default, rating, use_count)
             VALUES ('tmpl-1', 'Calm', 'calm', 'be calm', '[]', ?, 180, 0, 0, 0)",
        )
        .bind(serde_json::to_string(&vec![line.id.clone()]).unwrap())
        .execute(&store.db)
        .await
        .unwrap();

        let result = store.delete_affirmation_if_unreferenced(&line.id).await;
        assert!(matches!(result, Err(LibraryError::InUse(_))));
    }

    #[tokio::test]
    async fn delete_default_template_fails() {
        let store = test_store().await;
        sqlx::query(
            "INSERT INTO session_templates (id, title, goal, canonical_intent, intent_keywords_json, affirmation_ids_json, target_length_sec, is_default, rating, use_count)
             VALUES ('tmpl-default', 'Sleep', 'sleep', 'fall asleep', '[]', '[]', 180, 1, 0, 0)",
        )
        .execute(&store.db)
        .await
        .unwrap();

        let result = store.delete_template("tmpl-default").await;
        assert!(matches!(result, Err(LibraryError::CannotDelete)));
    }
}
