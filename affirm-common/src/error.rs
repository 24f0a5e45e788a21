//! Common error types shared by the affirmation pipeline crates

use thiserror::Error;

/// Common result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Low-level errors surfaced by `db::init` and `config`: schema/connection
/// failures propagate as `Database`/`Io` through `?`, and path resolution
/// constructs `Config` directly. Request-facing concerns (not-found,
/// validation, ...) belong to `affirm-core`'s own `ApiError` instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
