//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! crm-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `CRM_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection string
//!
//! # Migration Files
//!
//! `crates/server/migrations/`

use super::{CliError, connect};

/// Run the CRM migrations.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a migration fails.
pub async fn run() -> Result<(), CliError> {
    let store = connect().await?;

    tracing::info!("Running CRM migrations...");
    sqlx::migrate!("../server/migrations")
        .run(store.pool())
        .await?;

    tracing::info!("CRM migrations complete!");
    Ok(())
}
