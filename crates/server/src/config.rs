//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CRM_JWT_SECRET` - HS256 secret shared with the identity provider (min 32 chars, high entropy)
//!
//! ## Optional
//! - `CRM_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`;
//!   when neither is set the in-memory store is used)
//! - `CRM_HOST` - Bind address (default: 127.0.0.1)
//! - `CRM_PORT` - Listen port (default: 3002)
//! - `CRM_TRANSITION_POLICY` - `strict` or `permissive` (default: strict)
//! - `CRM_JWT_ISSUER` - Required `iss` claim on bearer tokens
//! - `CRM_LOG_JSON` - Emit JSON log lines when set
//! - `RECEIPT_RETRY_INTERVAL_SECS` - Receipt backlog drain interval (default: 60)
//! - `SENTRY_DSN`, `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`, `SENTRY_TRACES_SAMPLE_RATE`
//!
//! ## Optional (payment gateway)
//! - `PAYMENT_GATEWAY_URL` - Base URL of the card capture API
//! - `PAYMENT_GATEWAY_API_KEY` - Bearer key for the capture API
//! - `PAYMENT_GATEWAY_TIMEOUT_SECS` - Request timeout (default: 30)
//!
//! Without the gateway pair the sandbox gateway is used.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use parts_crm_core::TransitionPolicy;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

const MIN_JWT_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RECEIPT_RETRY_SECS: u64 = 60;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// CRM server configuration.
#[derive(Debug, Clone)]
pub struct CrmConfig {
    /// `PostgreSQL` connection URL; `None` selects the in-memory store
    pub database_url: Option<SecretString>,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Bearer token verification
    pub jwt: JwtConfig,
    /// Status transition table enforced by the engine
    pub transition_policy: TransitionPolicy,
    /// Card capture API; `None` selects the sandbox gateway
    pub gateway: Option<GatewayConfig>,
    /// How often parked payment receipts are retried
    pub receipt_retry_interval: Duration,
    /// Emit JSON log lines instead of text
    pub log_json: bool,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
}

/// Bearer token verification settings.
///
/// Implements `Debug` manually to redact the signing secret.
#[derive(Clone)]
pub struct JwtConfig {
    /// HS256 signing secret
    pub secret: SecretString,
    /// Expected `iss` claim
    pub issuer: Option<String>,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl JwtConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let secret = get_validated_secret("CRM_JWT_SECRET")?;
        validate_secret_length(&secret, "CRM_JWT_SECRET")?;
        Ok(Self {
            secret,
            issuer: get_optional_env("CRM_JWT_ISSUER"),
        })
    }
}

/// Card capture API configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct GatewayConfig {
    /// Base URL of the capture API
    pub base_url: Url,
    /// Bearer API key
    pub api_key: SecretString,
    /// Per-request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GatewayConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let url = get_optional_env("PAYMENT_GATEWAY_URL");
        let api_key = get_optional_env("PAYMENT_GATEWAY_API_KEY");

        match (url, api_key) {
            (Some(url), Some(key)) => {
                let base_url = Url::parse(&url).map_err(|e| {
                    ConfigError::InvalidEnvVar("PAYMENT_GATEWAY_URL".to_string(), e.to_string())
                })?;
                validate_secret_strength(&key, "PAYMENT_GATEWAY_API_KEY")?;
                let timeout = parse_secs("PAYMENT_GATEWAY_TIMEOUT_SECS", DEFAULT_GATEWAY_TIMEOUT_SECS)?;
                Ok(Some(Self {
                    base_url,
                    api_key: SecretString::from(key),
                    timeout,
                }))
            }
            (None, None) => Ok(None),
            _ => Err(ConfigError::InvalidEnvVar(
                "PAYMENT_GATEWAY_*".to_string(),
                "Both PAYMENT_GATEWAY_URL and PAYMENT_GATEWAY_API_KEY must be set together"
                    .to_string(),
            )),
        }
    }
}

impl CrmConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("CRM_DATABASE_URL");
        let host = get_env_or_default("CRM_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("CRM_HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("CRM_PORT", "3002")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("CRM_PORT".to_string(), e.to_string()))?;
        let transition_policy = get_env_or_default("CRM_TRANSITION_POLICY", "strict")
            .parse::<TransitionPolicy>()
            .map_err(|e| ConfigError::InvalidEnvVar("CRM_TRANSITION_POLICY".to_string(), e))?;

        let jwt = JwtConfig::from_env()?;
        let gateway = GatewayConfig::from_env()?;
        let receipt_retry_interval =
            parse_secs("RECEIPT_RETRY_INTERVAL_SECS", DEFAULT_RECEIPT_RETRY_SECS)?;
        let log_json = get_optional_env("CRM_LOG_JSON").is_some();

        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.1);

        Ok(Self {
            database_url,
            host,
            port,
            jwt,
            transition_policy,
            gateway,
            receipt_retry_interval,
            log_json,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Configuration for tests and local tooling: in-memory store, sandbox
    /// gateway, strict transitions.
    #[must_use]
    pub fn for_secret(secret: SecretString) -> Self {
        Self {
            database_url: None,
            host: IpAddr::from([127, 0, 0, 1]),
            port: 3002,
            jwt: JwtConfig {
                secret,
                issuer: None,
            },
            transition_policy: TransitionPolicy::Strict,
            gateway: None,
            receipt_retry_interval: Duration::from_secs(DEFAULT_RECEIPT_RETRY_SECS),
            log_json: false,
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.0,
        }
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Option<SecretString> {
    get_optional_env(primary_key)
        .or_else(|| get_optional_env("DATABASE_URL"))
        .map(SecretString::from)
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let secs = get_env_or_default(key, &default.to_string())
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if secs == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

/// Validate that a signing secret meets minimum length requirements.
fn validate_secret_length(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_JWT_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_JWT_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("ab") - 1.0).abs() < 0.01);
        assert!(shannon_entropy("aB3$xY9!mK2@nL5#") > 3.3);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let err = validate_secret_strength("your-jwt-signing-key-goes-here", "CRM_JWT_SECRET")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
        assert!(validate_secret_strength("changeme123", "CRM_JWT_SECRET").is_err());
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength(&"ab".repeat(20), "CRM_JWT_SECRET");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        assert!(validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "CRM_JWT_SECRET").is_ok());
    }

    #[test]
    fn test_validate_secret_length() {
        assert!(validate_secret_length(&SecretString::from("short"), "CRM_JWT_SECRET").is_err());
        assert!(validate_secret_length(&SecretString::from("k".repeat(32)), "CRM_JWT_SECRET").is_ok());
    }

    #[test]
    fn test_socket_addr() {
        let config = CrmConfig::for_secret(SecretString::from("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6"));
        let addr = config.socket_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 3002);
        assert_eq!(config.transition_policy, TransitionPolicy::Strict);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let jwt = JwtConfig {
            secret: SecretString::from("super_secret_signing_key"),
            issuer: Some("https://id.parts.test".to_string()),
        };
        let gateway = GatewayConfig {
            base_url: Url::parse("https://gateway.parts.test").unwrap(),
            api_key: SecretString::from("gw_live_key_123"),
            timeout: Duration::from_secs(30),
        };

        let jwt_debug = format!("{jwt:?}");
        assert!(jwt_debug.contains("https://id.parts.test"));
        assert!(jwt_debug.contains("[REDACTED]"));
        assert!(!jwt_debug.contains("super_secret_signing_key"));

        let gateway_debug = format!("{gateway:?}");
        assert!(gateway_debug.contains("gateway.parts.test"));
        assert!(!gateway_debug.contains("gw_live_key_123"));
    }
}
