//! Subcommand implementations.
//!
//! Every command except `token` talks to `PostgreSQL` through the same
//! record store the server uses.

pub mod migrate;
pub mod seed;
pub mod tenants;
pub mod token;

use secrecy::SecretString;
use thiserror::Error;

use parts_crm_server::db::{PgStore, RepositoryError, create_pool};

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store error: {0}")]
    Store(#[from] RepositoryError),

    /// Input rejected before anything was written.
    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Token signing failed: {0}")]
    Token(String),
}

/// `CRM_DATABASE_URL`, falling back to `DATABASE_URL`.
fn database_url() -> Result<SecretString, CliError> {
    dotenvy::dotenv().ok();
    std::env::var("CRM_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CliError::MissingEnvVar("CRM_DATABASE_URL"))
}

/// Connect to the CRM database.
async fn connect() -> Result<PgStore, CliError> {
    let url = database_url()?;
    tracing::info!("Connecting to CRM database...");
    Ok(PgStore::new(create_pool(&url).await?))
}
