//! Generation Log (C9): records the routing decision behind every
//! session, accepts feedback ratings, and nudges the referenced
//! template/affirmation ratings upward on positive feedback.

use crate::error::ApiError;
use crate::matcher::MatchOutcome;
use affirm_common::db::GenerationLogRow;
use affirm_common::uuid_utils;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::str::FromStr;

/// A rating at or above this nudges the referenced lines/templates.
const POSITIVE_RATING_THRESHOLD: i64 = 4;
const RATING_NUDGE: f64 = 0.1;
const RATING_CEILING: f64 = 5.0;

pub struct GenerationLog {
    db: SqlitePool,
}

impl GenerationLog {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        user_id: Option<&str>,
        user_intent: &str,
        goal: &str,
        outcome: &MatchOutcome,
        session_id: &str,
    ) -> Result<(), ApiError> {
        let id = uuid_utils::generate().to_string();
        let affirmations_used_json = serde_json::to_string(outcome.affirmations()).unwrap_or_else(|_| "[]".to_string());
        let created_at = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO generation_logs
                (id, user_id, user_intent, goal, match_type, confidence, affirmations_used_json, template_id, api_cost, session_id, created_at, was_rated, user_rating, was_replayed)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, NULL)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(user_intent)
        .bind(goal)
        .bind(outcome.match_type().as_str())
        .bind(outcome.confidence())
        .bind(&affirmations_used_json)
        .bind(outcome.template_id())
        .bind(outcome.cost().to_string())
        .bind(session_id)
        .bind(&created_at)
        .execute(&self.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

        Ok(())
    }

    /// Records a session's outcome rating. A rating ≥4 nudges the rating of
    /// every template/affirmation referenced by the logged decision, clamped
    /// at 5.0. Idempotent at the row level: rating the same session twice
    /// overwrites the stored rating rather than nudging a second time.
    /// Scoped to `(userId, sessionId)` - `user_id` is `None` for guest
    /// sessions, matched with SQLite's `IS` so a `NULL` owner still resolves.
    pub async fn rate(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        rating: i64,
        was_replayed: Option<bool>,
    ) -> Result<(), ApiError> {
        if !(1..=5).contains(&rating) {
            return Err(ApiError::Validation("rating must be between 1 and 5".to_string()));
        }

        let log = sqlx::query_as::<_, GenerationLogRow>(
            "SELECT * FROM generation_logs WHERE session_id = ? AND user_id IS ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(session_id.to_string()))?;

        let already_nudged = log.was_rated && log.user_rating.map(|r| r >= POSITIVE_RATING_THRESHOLD).unwrap_or(false);

        sqlx::query(
            "UPDATE generation_logs SET was_rated = 1, user_rating = ?, was_replayed = ? WHERE session_id = ? AND user_id IS ?",
        )
        .bind(rating)
        .bind(was_replayed)
        .bind(session_id)
        .bind(user_id)
        .execute(&self.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

        if rating >= POSITIVE_RATING_THRESHOLD && !already_nudged {
            self.nudge_ratings(&log).await?;
        }

        Ok(())
    }

    async fn nudge_ratings(&self, log: &GenerationLogRow) -> Result<(), ApiError> {
        if let Some(template_id) = &log.template_id {
            sqlx::query(
                "UPDATE session_templates SET rating = MIN(?, rating + ?), use_count = use_count + 1 WHERE id = ?",
            )
            .bind(RATING_CEILING)
            .bind(RATING_NUDGE)
            .bind(template_id)
            .execute(&self.db)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        }

        let affirmation_texts: Vec<String> = serde_json::from_str(&log.affirmations_used_json).unwrap_or_default();
        for text in &affirmation_texts {
            sqlx::query(
                "UPDATE affirmation_lines
                 SET rating = MIN(?, COALESCE(rating, 0) + ?), use_count = COALESCE(use_count, 0) + 1
                 WHERE text = ?",
            )
            .bind(RATING_CEILING)
            .bind(RATING_NUDGE)
            .bind(text)
            .execute(&self.db)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        }

        Ok(())
    }

    /// Sum of `apiCost` across a user's generation-log entries since a
    /// given timestamp, for the cost-ledger aggregate.
    pub async fn total_cost(&self, user_id: &str, since: &str) -> Result<Decimal, ApiError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT api_cost FROM generation_logs WHERE user_id = ? AND created_at >= ?",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

        let mut total = Decimal::ZERO;
        for (cost,) in rows {
            total += Decimal::from_str(&cost).unwrap_or(Decimal::ZERO);
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use affirm_common::db::init_database;

    async fn test_log() -> GenerationLog {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("test.db")).await.unwrap();
        std::mem::forget(dir);
        GenerationLog::new(pool)
    }

    #[tokio::test]
    async fn positive_rating_nudges_referenced_affirmation() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("test.db")).await.unwrap();
        std::mem::forget(dir);

        sqlx::query(
            "INSERT INTO affirmation_lines (id, text, goal, tags_json, rating, use_count, created_at)
             VALUES ('aff-1', 'I am calm', 'calm', '[]', 4.95, 1, '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let log = GenerationLog::new(pool);
        let outcome = MatchOutcome::Fallback { affirmations: vec!["I am calm".to_string()] };
        log.record(Some("user-1"), "be calm", "calm", &outcome, "sess-1").await.unwrap();

        log.rate("sess-1", Some("user-1"), 5, Some(false)).await.unwrap();

        let row: (f64,) = sqlx::query_as("SELECT rating FROM affirmation_lines WHERE id = 'aff-1'")
            .fetch_one(&log.db)
            .await
            .unwrap();
        assert_eq!(row.0, 5.0);
    }

    #[tokio::test]
    async fn rating_below_threshold_does_not_nudge() {
        let log = test_log().await;
        let outcome = MatchOutcome::Fallback { affirmations: vec!["x".to_string()] };
        log.record(None, "intent", "calm", &outcome, "sess-2").await.unwrap();
        log.rate("sess-2", None, 2, None).await.unwrap();

        let row = sqlx::query_as::<_, GenerationLogRow>("SELECT * FROM generation_logs WHERE session_id = 'sess-2'")
            .fetch_one(&log.db)
            .await
            .unwrap();
        assert_eq!(row.user_rating, Some(2));
    }
}
