//! Configuration resolution.
//!
//! The bulk of the config (database path, port, log level, base URL,
//! admin allowlist) follows CLI > ENV > TOML > compiled default, the
//! same tiering `affirm_common::config::resolve_path` implements for
//! the database path specifically. The two provider credentials
//! (`llm_api_key`, `tts_api_key`) additionally accept a database
//! override, since an admin may want to rotate them without a redeploy:
//! Database > ENV > TOML for those two fields only.

use affirm_common::config::{default_data_dir, resolve_path};
use affirm_common::{Error, Result};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub database_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub base_url: Option<String>,
    pub admin_email_allowlist: Option<Vec<String>>,
    pub llm_api_key: Option<String>,
    pub tts_api_key: Option<String>,
    pub kv_url: Option<String>,
    pub object_storage_bucket: Option<String>,
    pub object_storage_endpoint: Option<String>,
}

fn default_port() -> u16 {
    8080
}

/// Fully-resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub port: u16,
    pub log_level: String,
    pub base_url: String,
    pub admin_email_allowlist: Vec<String>,
    /// Present only if configured at the CLI/ENV/TOML tier; the database
    /// tier (checked separately, see `resolve_llm_api_key`) takes
    /// priority when present.
    pub llm_api_key: Option<String>,
    pub tts_api_key: Option<String>,
    pub kv_url: Option<String>,
    pub object_storage_bucket: Option<String>,
    pub object_storage_endpoint: Option<String>,
}

impl Config {
    pub fn load(
        config_path: Option<&std::path::Path>,
        database_override: Option<PathBuf>,
        port_override: Option<u16>,
    ) -> Result<Self> {
        let toml_config = load_toml(config_path).unwrap_or_default();

        let database_path = resolve_path(
            database_override.as_deref().and_then(|p| p.to_str()),
            "AFFIRM_DATABASE_PATH",
            None,
            || {
                toml_config
                    .database_path
                    .clone()
                    .unwrap_or_else(|| default_data_dir().join("affirm.db"))
            },
        )?;

        let port = port_override
            .or_else(|| std::env::var("AFFIRM_PORT").ok().and_then(|v| v.parse().ok()))
            .or(toml_config.port)
            .unwrap_or_else(default_port);

        let log_level = std::env::var("AFFIRM_LOG_LEVEL")
            .ok()
            .or_else(|| toml_config.log_level.clone())
            .unwrap_or_else(|| "info".to_string());

        let base_url = std::env::var("AFFIRM_BASE_URL")
            .ok()
            .or_else(|| toml_config.base_url.clone())
            .unwrap_or_else(|| format!("http://127.0.0.1:{port}"));

        let admin_email_allowlist = std::env::var("AFFIRM_ADMIN_EMAILS")
            .ok()
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .or_else(|| toml_config.admin_email_allowlist.clone())
            .unwrap_or_default();

        let llm_api_key = tiered_secret("AFFIRM_LLM_API_KEY", toml_config.llm_api_key.clone());
        let tts_api_key = tiered_secret("AFFIRM_TTS_API_KEY", toml_config.tts_api_key.clone());
        let kv_url = tiered_secret("AFFIRM_KV_URL", toml_config.kv_url.clone());
        let object_storage_bucket =
            tiered_secret("AFFIRM_OBJECT_STORAGE_BUCKET", toml_config.object_storage_bucket.clone());
        let object_storage_endpoint = tiered_secret(
            "AFFIRM_OBJECT_STORAGE_ENDPOINT",
            toml_config.object_storage_endpoint.clone(),
        );

        Ok(Config {
            database_path,
            port,
            log_level,
            base_url,
            admin_email_allowlist,
            llm_api_key,
            tts_api_key,
            kv_url,
            object_storage_bucket,
            object_storage_endpoint,
        })
    }
}

fn tiered_secret(env_var: &str, toml_value: Option<String>) -> Option<String> {
    std::env::var(env_var).ok().filter(|v| !v.trim().is_empty()).or(toml_value)
}

fn load_toml(config_path: Option<&std::path::Path>) -> Result<TomlConfig> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => match affirm_common::config::find_config_file() {
            Ok(p) => p,
            Err(_) => return Ok(TomlConfig::default()),
        },
    };

    if !path.exists() {
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("failed to read config file {}: {e}", path.display())))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse config file {}: {e}", path.display())))
}

/// Resolve the LLM API key with Database > ENV > TOML priority. The
/// database row is read from `settings` (key `llm_api_key`) if present;
/// absence at every tier means generation (C5) is never consulted.
pub async fn resolve_llm_api_key(db: &SqlitePool, config: &Config) -> Option<String> {
    resolve_secret_with_db(db, "llm_api_key", config.llm_api_key.clone()).await
}

pub async fn resolve_tts_api_key(db: &SqlitePool, config: &Config) -> Option<String> {
    resolve_secret_with_db(db, "tts_api_key", config.tts_api_key.clone()).await
}

async fn resolve_secret_with_db(db: &SqlitePool, key: &str, fallback: Option<String>) -> Option<String> {
    let db_value: Option<(String,)> =
        sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(db)
            .await
            .unwrap_or_else(|e| {
                warn!("settings lookup for {key} failed, falling back: {e}");
                None
            });

    match db_value {
        Some((value,)) if !value.trim().is_empty() => Some(value),
        _ => fallback,
    }
}
