//! Subscription Gate (C8): lazy monthly quota reset, atomic
//! check-and-increment for custom-session creation, and tier
//! transitions from purchase verification.

use crate::error::ApiError;
use affirm_common::db::UserSubscriptionRow;
use chrono::{Datelike, Utc};
use sqlx::SqlitePool;

pub const FREE_MONTHLY_CUSTOM_SESSIONS: i64 = 3;

pub struct SubscriptionGate {
    db: SqlitePool,
}

impl SubscriptionGate {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn get(&self, user_id: &str) -> Result<UserSubscriptionRow, ApiError> {
        self.reset_if_new_month(user_id).await?;
        self.load_or_create(user_id).await
    }

    /// Atomically checks and consumes one unit of this month's custom-session
    /// quota. A free-tier row at its limit is rejected without mutation; pro
    /// tier has no quota. The `UPDATE ... WHERE` affecting zero rows is how
    /// the check-and-increment stays atomic under concurrent requests.
    pub async fn consume_custom_session_quota(&self, user_id: &str) -> Result<(), ApiError> {
        self.reset_if_new_month(user_id).await?;
        let sub = self.load_or_create(user_id).await?;

        if sub.tier == "pro" {
            return Ok(());
        }

        let result = sqlx::query(
            "UPDATE user_subscriptions
             SET custom_sessions_used_this_month = custom_sessions_used_this_month + 1
             WHERE user_id = ? AND custom_sessions_used_this_month < ?",
        )
        .bind(user_id)
        .bind(FREE_MONTHLY_CUSTOM_SESSIONS)
        .execute(&self.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ApiError::QuotaExceeded {
                limit: FREE_MONTHLY_CUSTOM_SESSIONS,
                used: sub.custom_sessions_used_this_month,
                tier: sub.tier,
            });
        }

        Ok(())
    }

    /// Reverses a quota consumption when the downstream operation it was
    /// gating fails after the count was already incremented.
    pub async fn rollback_custom_session_quota(&self, user_id: &str) -> Result<(), ApiError> {
        sqlx::query(
            "UPDATE user_subscriptions
             SET custom_sessions_used_this_month = MAX(custom_sessions_used_this_month - 1, 0)
             WHERE user_id = ?",
        )
        .bind(user_id)
        .execute(&self.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(())
    }

    pub async fn verify_purchase(&self, user_id: &str, billing_period: &str) -> Result<UserSubscriptionRow, ApiError> {
        self.reset_if_new_month(user_id).await?;
        let now = Utc::now();
        let period_end = now + chrono::Duration::days(if billing_period == "annual" { 365 } else { 30 });

        sqlx::query(
            "INSERT INTO user_subscriptions
                (user_id, tier, status, billing_period, current_period_start, current_period_end, cancel_at_period_end, custom_sessions_used_this_month, last_reset_date)
             VALUES (?, 'pro', 'active', ?, ?, ?, 0, 0, ?)
             ON CONFLICT (user_id) DO UPDATE SET
                tier = 'pro',
                status = 'active',
                billing_period = excluded.billing_period,
                current_period_start = excluded.current_period_start,
                current_period_end = excluded.current_period_end,
                cancel_at_period_end = 0",
        )
        .bind(user_id)
        .bind(billing_period)
        .bind(now.to_rfc3339())
        .bind(period_end.to_rfc3339())
        .bind(now.format("%Y-%m").to_string())
        .execute(&self.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

        self.load_or_create(user_id).await
    }

    pub async fn cancel(&self, user_id: &str) -> Result<UserSubscriptionRow, ApiError> {
        sqlx::query("UPDATE user_subscriptions SET cancel_at_period_end = 1 WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.db)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        self.load_or_create(user_id).await
    }

    async fn load_or_create(&self, user_id: &str) -> Result<UserSubscriptionRow, ApiError> {
        if let Some(row) = sqlx::query_as::<_, UserSubscriptionRow>(
            "SELECT * FROM user_subscriptions WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        {
            return Ok(row);
        }

        let last_reset_date = Utc::now().format("%Y-%m").to_string();
        sqlx::query(
            "INSERT INTO user_subscriptions (user_id, tier, status, custom_sessions_used_this_month, last_reset_date, cancel_at_period_end)
             VALUES (?, 'free', 'active', 0, ?, 0)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(&last_reset_date)
        .execute(&self.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

        sqlx::query_as::<_, UserSubscriptionRow>("SELECT * FROM user_subscriptions WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.db)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))
    }

    /// Free tier's quota resets on the first read in a new calendar month.
    async fn reset_if_new_month(&self, user_id: &str) -> Result<(), ApiError> {
        let current_month = Utc::now().format("%Y-%m").to_string();
        sqlx::query(
            "UPDATE user_subscriptions
             SET custom_sessions_used_this_month = 0, last_reset_date = ?
             WHERE user_id = ? AND last_reset_date != ?",
        )
        .bind(&current_month)
        .bind(user_id)
        .bind(&current_month)
        .execute(&self.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use affirm_common::db::init_database;

    async fn test_gate() -> SubscriptionGate {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("test.db")).await.unwrap();
        std::mem::forget(dir);
        SubscriptionGate::new(pool)
    }

    #[tokio::test]
    async fn free_tier_quota_exhausts_after_three() {
        let gate = test_gate().await;
        for _ in 0..FREE_MONTHLY_CUSTOM_SESSIONS {
            gate.consume_custom_session_quota("user-1").await.unwrap();
        }
        let result = gate.consume_custom_session_quota("user-1").await;
        assert!(matches!(result, Err(ApiError::QuotaExceeded { .. })));
    }

    #[tokio::test]
    async fn rollback_restores_quota() {
        let gate = test_gate().await;
        gate.consume_custom_session_quota("user-1").await.unwrap();
        gate.rollback_custom_session_quota("user-1").await.unwrap();
        let sub = gate.get("user-1").await.unwrap();
        assert_eq!(sub.custom_sessions_used_this_month, 0);
    }

    #[tokio::test]
    async fn verify_purchase_upgrades_to_pro_and_lifts_quota() {
        let gate = test_gate().await;
        for _ in 0..FREE_MONTHLY_CUSTOM_SESSIONS {
            gate.consume_custom_session_quota("user-1").await.unwrap();
        }
        gate.verify_purchase("user-1", "monthly").await.unwrap();
        let result = gate.consume_custom_session_quota("user-1").await;
        assert!(result.is_ok());
    }
}
