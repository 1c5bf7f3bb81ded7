//! Development bearer tokens.
//!
//! Signs with `CRM_JWT_SECRET`, so only useful against a server that shares
//! the secret. The subject must match a user's `external_id`.

use chrono::Duration;
use secrecy::SecretString;

use parts_crm_core::Role;
use parts_crm_server::identity::issue_token;

use super::CliError;

/// Print a signed token to stdout.
///
/// # Errors
///
/// Returns an error if the secret is missing, the role claim is unknown or the
/// lifetime is not positive.
pub fn issue(subject: &str, role: Option<&str>, ttl_hours: i64) -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    let secret = std::env::var("CRM_JWT_SECRET")
        .map(SecretString::from)
        .map_err(|_| CliError::MissingEnvVar("CRM_JWT_SECRET"))?;

    if let Some(claim) = role {
        Role::from_claim(claim).map_err(|e| CliError::Invalid(e.to_string()))?;
    }
    if ttl_hours <= 0 {
        return Err(CliError::Invalid("ttl must be at least one hour".to_string()));
    }

    let token = issue_token(&secret, subject, role, Duration::hours(ttl_hours))
        .map_err(|e| CliError::Token(e.to_string()))?;

    tracing::info!(subject, ttl_hours, "Token issued");
    #[allow(clippy::print_stdout)]
    {
        println!("{token}");
    }
    Ok(())
}
