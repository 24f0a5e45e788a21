//! Pipeline Orchestrator (C10): sequences the rate limiter, subscription
//! gate, session assembler, and generation log for the two
//! session-creation entry points. No business logic of its own beyond
//! wiring and error mapping.

use crate::error::ApiError;
use crate::generation_log::GenerationLog;
use crate::rate_limiter::{rate_limit_key, RateLimiter, API_CLASS};
use crate::session::{GoalSessionResult, SessionAssembler};
use crate::subscription::SubscriptionGate;
use crate::types::{Goal, SessionResponse};
use std::sync::Arc;
use std::time::Duration;

pub const GENERATE_DEADLINE_SEC: u64 = 30;
pub const PLAYLIST_DEADLINE_SEC: u64 = 10;

pub struct PipelineOrchestrator {
    rate_limiter: Arc<RateLimiter>,
    subscription: Arc<SubscriptionGate>,
    session_assembler: Arc<SessionAssembler>,
    generation_log: Arc<GenerationLog>,
}

impl PipelineOrchestrator {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        subscription: Arc<SubscriptionGate>,
        session_assembler: Arc<SessionAssembler>,
        generation_log: Arc<GenerationLog>,
    ) -> Self {
        Self { rate_limiter, subscription, session_assembler, generation_log }
    }

    pub async fn generate_session(
        &self,
        user_id: Option<&str>,
        ip: &str,
        goal: Goal,
        custom_prompt: Option<&str>,
        binaural_category: Option<String>,
        binaural_hz: Option<f64>,
        is_first_session: bool,
    ) -> Result<SessionResponse, ApiError> {
        let key = rate_limit_key(API_CLASS.name, user_id, ip);
        let allow = self.rate_limiter.allow(&key, API_CLASS.window_secs, API_CLASS.limit).await;
        if !allow.allowed {
            return Err(ApiError::RateLimited { retry_after_sec: (allow.reset_at_epoch_sec - chrono::Utc::now().timestamp()).max(0) });
        }

        let intention = custom_prompt.unwrap_or(goal.as_str()).to_string();

        let outcome_future = self.session_assembler.create_from_goal(
            user_id,
            ip,
            goal,
            custom_prompt,
            binaural_category,
            binaural_hz,
            is_first_session,
        );

        let GoalSessionResult { response, outcome, session_id } =
            tokio::time::timeout(Duration::from_secs(GENERATE_DEADLINE_SEC), outcome_future)
                .await
                .map_err(|_| ApiError::Timeout { retry_after_sec: Some(5) })??;

        self.generation_log
            .record(user_id, &intention, goal.as_str(), &outcome, &session_id)
            .await?;

        Ok(response)
    }

    pub async fn create_custom_session(
        &self,
        user_id: &str,
        ip: &str,
        title: &str,
        affirmations: &[String],
        goal: Option<String>,
        binaural_category: Option<String>,
        binaural_hz: Option<f64>,
    ) -> Result<SessionResponse, ApiError> {
        let key = rate_limit_key(API_CLASS.name, Some(user_id), ip);
        let allow = self.rate_limiter.allow(&key, API_CLASS.window_secs, API_CLASS.limit).await;
        if !allow.allowed {
            return Err(ApiError::RateLimited { retry_after_sec: (allow.reset_at_epoch_sec - chrono::Utc::now().timestamp()).max(0) });
        }

        self.subscription.consume_custom_session_quota(user_id).await?;

        match self
            .session_assembler
            .create_custom(user_id, title, affirmations, goal, binaural_category, binaural_hz)
            .await
        {
            Ok(response) => Ok(response),
            Err(e) => {
                self.subscription.rollback_custom_session_quota(user_id).await?;
                Err(e)
            }
        }
    }

    pub async fn get_playlist(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        tier: crate::types::Tier,
    ) -> Result<crate::types::Playlist, ApiError> {
        tokio::time::timeout(
            Duration::from_secs(PLAYLIST_DEADLINE_SEC),
            self.session_assembler.get_playlist(session_id, user_id, tier),
        )
        .await
        .map_err(|_| ApiError::Timeout { retry_after_sec: Some(2) })?
    }
}
