//! Database initialization: connects to the SQLite store and creates the
//! schema if it is missing. Default sessions are never persisted here —
//! the static catalog lives in process memory, owned by `affirm-core`.

use crate::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePool::connect(&db_url).await?;

    create_schema_version_table(&pool).await?;
    create_settings_table(&pool).await?;
    create_affirmation_lines_table(&pool).await?;
    create_session_templates_table(&pool).await?;
    create_affirmation_audio_table(&pool).await?;
    create_affirmation_sessions_table(&pool).await?;
    create_session_affirmations_table(&pool).await?;
    create_user_preferences_table(&pool).await?;
    create_user_subscriptions_table(&pool).await?;
    create_generation_logs_table(&pool).await?;

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Admin-settable overrides (provider API keys, feature toggles) that
/// take priority over environment/TOML configuration when present.
async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_affirmation_lines_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS affirmation_lines (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            goal TEXT NOT NULL,
            emotion TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            rating REAL,
            use_count INTEGER,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_affirmation_lines_goal ON affirmation_lines(goal)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_session_templates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_templates (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            goal TEXT NOT NULL,
            canonical_intent TEXT NOT NULL,
            intent_keywords_json TEXT NOT NULL DEFAULT '[]',
            affirmation_ids_json TEXT NOT NULL DEFAULT '[]',
            binaural_category TEXT,
            binaural_hz REAL,
            target_length_sec INTEGER NOT NULL,
            is_default INTEGER NOT NULL DEFAULT 0,
            rating REAL NOT NULL DEFAULT 0,
            use_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_session_templates_goal ON session_templates(goal)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_affirmation_audio_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS affirmation_audio (
            id TEXT PRIMARY KEY,
            affirmation_id TEXT NOT NULL,
            voice_id TEXT NOT NULL,
            pace_id TEXT NOT NULL,
            url TEXT NOT NULL,
            duration_ms INTEGER NOT NULL CHECK (duration_ms > 0),
            bytes INTEGER NOT NULL,
            content_type TEXT NOT NULL,
            UNIQUE (affirmation_id, voice_id, pace_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_affirmation_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS affirmation_sessions (
            id TEXT PRIMARY KEY,
            owner_user_id TEXT,
            goal TEXT NOT NULL,
            title TEXT NOT NULL,
            voice_id TEXT NOT NULL,
            pace_id TEXT NOT NULL,
            background_noise TEXT NOT NULL,
            binaural_category TEXT,
            binaural_hz REAL,
            length_sec INTEGER NOT NULL,
            silence_between_ms INTEGER NOT NULL,
            is_favorite INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sessions_owner_created ON affirmation_sessions(owner_user_id, created_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sessions_owner_favorite ON affirmation_sessions(owner_user_id, is_favorite)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_goal ON affirmation_sessions(goal)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_session_affirmations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_affirmations (
            session_id TEXT NOT NULL,
            affirmation_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            silence_after_ms INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (session_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_user_preferences_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_preferences (
            user_id TEXT PRIMARY KEY,
            voice_id TEXT NOT NULL DEFAULT 'neutral',
            pace_id TEXT NOT NULL DEFAULT 'normal',
            background_noise TEXT NOT NULL DEFAULT 'rain',
            affirmation_spacing_sec INTEGER NOT NULL DEFAULT 8
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_user_subscriptions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_subscriptions (
            user_id TEXT PRIMARY KEY,
            tier TEXT NOT NULL,
            status TEXT NOT NULL,
            billing_period TEXT,
            current_period_start TIMESTAMP,
            current_period_end TIMESTAMP,
            cancel_at_period_end INTEGER NOT NULL DEFAULT 0,
            custom_sessions_used_this_month INTEGER NOT NULL DEFAULT 0,
            last_reset_date TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_reset_tier ON user_subscriptions(last_reset_date, tier)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_tier_status ON user_subscriptions(tier, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_generation_logs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS generation_logs (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            user_intent TEXT NOT NULL,
            goal TEXT NOT NULL,
            match_type TEXT NOT NULL CHECK (match_type IN ('exact', 'pooled', 'generated', 'fallback')),
            confidence REAL NOT NULL,
            affirmations_used_json TEXT NOT NULL DEFAULT '[]',
            template_id TEXT,
            api_cost TEXT NOT NULL DEFAULT '0',
            session_id TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            was_rated INTEGER NOT NULL DEFAULT 0,
            user_rating INTEGER,
            was_replayed INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_generation_logs_user ON generation_logs(user_id)")
        .execute(pool)
        .await?;

    Ok(())
}
