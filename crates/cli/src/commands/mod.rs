//! Subcommand implementations.

pub mod migrate;
pub mod renewals;
pub mod seed;
pub mod users;

use larder_api::config::ConfigError;
use larder_api::db::RepositoryError;
use larder_api::state::StateError;
use sqlx::PgPool;
use thiserror::Error;

/// Errors from any CLI command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database connection error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A migration failed to apply.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A repository call failed.
    #[error("{0}")]
    Repository(#[from] RepositoryError),

    /// Server configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Gateway or mailer could not be built.
    #[error("{0}")]
    State(#[from] StateError),

    /// Seed file could not be read or parsed.
    #[error("Seed file error: {0}")]
    Seed(String),

    /// Bad command-line input.
    #[error("Invalid input: {0}")]
    Invalid(String),
}

/// Connect using `LARDER_DATABASE_URL` (loading `.env` first).
pub async fn connect() -> Result<PgPool, CliError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("LARDER_DATABASE_URL")
        .map_err(|_| CliError::MissingEnvVar("LARDER_DATABASE_URL"))?;

    tracing::info!("Connecting to database...");
    Ok(PgPool::connect(&database_url).await?)
}
