//! Affirmation Session Core.
//!
//! Transforms a user intention into a playable session: spoken
//! affirmations, a binaural-beat layer, and a background-noise layer.
//! Owns generation, TTS materialization, persistence, quotas, and the
//! HTTP surface a client player consumes.

use affirm_core::config::Config;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "affirm-core")]
#[command(about = "Affirmation Session Core - hybrid affirmation pipeline and HTTP surface")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (overrides config file)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// HTTP server port (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "affirm_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Affirmation Session Core");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = Config::load(args.config.as_deref(), args.database, args.port)?;
    info!("Database: {}", config.database_path.display());
    info!("Port: {}", config.port);

    let db_pool = affirm_common::db::init_database(&config.database_path).await?;
    info!("Database connection established");

    let state = affirm_core::build_state(db_pool, &config).await;
    info!("Pipeline components wired (tts configured: {})", state.tts.is_configured());

    let app = affirm_core::build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("Listening on http://0.0.0.0:{}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
