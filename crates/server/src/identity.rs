//! Identity gate: bearer token to [`Principal`].
//!
//! Tokens are HS256 JWTs issued by the identity provider. The `sub` claim is
//! the provider's subject id and is resolved to the mirrored CRM user through
//! `crm_user.external_id`. A `role` claim, in either provider vocabulary, is
//! mapped onto [`Role`] here and overrides the stored role.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use moka::future::Cache;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use parts_crm_core::{Email, Role, RoleParseError};

use crate::config::JwtConfig;
use crate::db::{RecordStore, RepositoryError};
use crate::models::{Principal, User};

/// How long a subject-to-user lookup is reused.
const SUBJECT_CACHE_TTL: Duration = Duration::from_secs(60);
const SUBJECT_CACHE_CAPACITY: u64 = 10_000;

/// Claims the CRM reads from a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Identity provider subject id.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Expiration (Unix timestamp seconds)
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Why a request could not be authenticated.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("missing bearer token")]
    MissingCredentials,
    #[error("invalid or expired token")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
    #[error("no user is linked to this identity")]
    UnknownSubject,
    #[error("user has been deactivated")]
    Deactivated,
    #[error("organization is inactive")]
    OrganizationInactive,
    #[error(transparent)]
    UnknownRole(#[from] RoleParseError),
    #[error("user lookup failed: {0}")]
    Store(#[from] RepositoryError),
}

/// Verifies bearer tokens and resolves them to principals.
#[derive(Clone)]
pub struct IdentityGate {
    inner: Arc<IdentityGateInner>,
}

struct IdentityGateInner {
    decoding_key: DecodingKey,
    validation: Validation,
    users: Cache<String, User>,
}

impl IdentityGate {
    /// Build a gate for the configured signing secret and issuer.
    #[must_use]
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            inner: Arc::new(IdentityGateInner {
                decoding_key: DecodingKey::from_secret(config.secret.expose_secret().as_bytes()),
                validation,
                users: Cache::builder()
                    .max_capacity(SUBJECT_CACHE_CAPACITY)
                    .time_to_live(SUBJECT_CACHE_TTL)
                    .build(),
            }),
        }
    }

    /// Resolve a raw bearer token to a principal.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] when the token is invalid, the subject has no
    /// live CRM user, the user's organization is inactive, or the role claim
    /// is not recognized.
    #[instrument(skip_all)]
    pub async fn authenticate<S: RecordStore>(
        &self,
        store: &S,
        token: &str,
    ) -> Result<Principal, IdentityError> {
        let claims = jsonwebtoken::decode::<Claims>(
            token,
            &self.inner.decoding_key,
            &self.inner.validation,
        )
        .map_err(|e| {
            debug!("JWT validation failed: {e}");
            IdentityError::InvalidToken(e)
        })?
        .claims;

        let user = self.resolve_subject(store, &claims.sub).await?;
        if user.deleted {
            return Err(IdentityError::Deactivated);
        }
        let org_active = store
            .get_organization(user.org_id)
            .await?
            .is_some_and(|org| org.active);
        if !org_active {
            debug!(org_id = %user.org_id, "Organization is inactive");
            return Err(IdentityError::OrganizationInactive);
        }

        let role = match claims.role.as_deref() {
            Some(claim) => Role::from_claim(claim)?,
            None => user.role,
        };
        let email = claims
            .email
            .as_deref()
            .and_then(|e| Email::parse(e).ok())
            .or(user.email);

        Ok(Principal {
            user_id: user.id,
            org_id: user.org_id,
            role,
            email,
        })
    }

    /// Drop a cached subject so the next request re-reads the user.
    pub async fn forget(&self, external_id: &str) {
        self.inner.users.invalidate(external_id).await;
    }

    async fn resolve_subject<S: RecordStore>(
        &self,
        store: &S,
        subject: &str,
    ) -> Result<User, IdentityError> {
        if let Some(user) = self.inner.users.get(subject).await {
            return Ok(user);
        }

        let user = store
            .find_user_by_external_id(subject)
            .await?
            .ok_or(IdentityError::UnknownSubject)?;
        self.inner
            .users
            .insert(subject.to_string(), user.clone())
            .await;
        Ok(user)
    }
}

/// Sign a token the gate will accept. Used by `crm-cli token` and tests.
///
/// # Errors
///
/// Returns the `jsonwebtoken` error if signing fails.
pub fn issue_token(
    secret: &SecretString,
    subject: &str,
    role: Option<&str>,
    ttl: chrono::Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: subject.to_string(),
        email: None,
        role: role.map(str::to_string),
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        exp: (Utc::now() + ttl).timestamp().max(0) as usize,
        iss: None,
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, NewOrganization, NewUser, OrganizationPatch};

    const SECRET: &str = "t8#Qz!pL2@vR6&nX0^mK4*wB9$cJ1%hY";

    fn gate() -> (IdentityGate, SecretString) {
        let secret = SecretString::from(SECRET);
        let gate = IdentityGate::new(&JwtConfig {
            secret: secret.clone(),
            issuer: None,
        });
        (gate, secret)
    }

    async fn store_with_user(role: Role) -> (MemoryStore, User) {
        let store = MemoryStore::new();
        let org = store
            .create_organization(NewOrganization {
                name: "Northside Auto".to_string(),
                contact_email: None,
            })
            .await
            .unwrap();
        let user = store
            .create_user(NewUser {
                org_id: org.id,
                external_id: Some("idp|alice".to_string()),
                first_name: "Alice".to_string(),
                last_name: "Moreno".to_string(),
                email: Some(Email::parse("alice@northside.test").unwrap()),
                phone: None,
                role,
            })
            .await
            .unwrap();
        (store, user)
    }

    #[tokio::test]
    async fn test_authenticate_uses_stored_role_without_claim() {
        let (gate, secret) = gate();
        let (store, user) = store_with_user(Role::Processing).await;
        let token = issue_token(&secret, "idp|alice", None, chrono::Duration::minutes(5)).unwrap();

        let principal = gate.authenticate(&store, &token).await.unwrap();
        assert_eq!(principal.user_id, user.id);
        assert_eq!(principal.org_id, user.org_id);
        assert_eq!(principal.role, Role::Processing);
        assert_eq!(principal.email.unwrap().as_str(), "alice@northside.test");
    }

    #[tokio::test]
    async fn test_role_claim_is_mapped_and_wins() {
        let (gate, secret) = gate();
        let (store, _) = store_with_user(Role::Sales).await;
        let token = issue_token(
            &secret,
            "idp|alice",
            Some("FOLLOWUP_AGENT"),
            chrono::Duration::minutes(5),
        )
        .unwrap();

        let principal = gate.authenticate(&store, &token).await.unwrap();
        assert_eq!(principal.role, Role::Followup);
    }

    #[tokio::test]
    async fn test_rejects_bad_tokens() {
        let (gate, secret) = gate();
        let (store, _) = store_with_user(Role::Sales).await;

        let expired =
            issue_token(&secret, "idp|alice", None, chrono::Duration::minutes(-10)).unwrap();
        assert!(matches!(
            gate.authenticate(&store, &expired).await,
            Err(IdentityError::InvalidToken(_))
        ));

        let forged = issue_token(
            &SecretString::from("another-signing-key-entirely-0123456789"),
            "idp|alice",
            None,
            chrono::Duration::minutes(5),
        )
        .unwrap();
        assert!(matches!(
            gate.authenticate(&store, &forged).await,
            Err(IdentityError::InvalidToken(_))
        ));

        let stranger =
            issue_token(&secret, "idp|nobody", None, chrono::Duration::minutes(5)).unwrap();
        assert!(matches!(
            gate.authenticate(&store, &stranger).await,
            Err(IdentityError::UnknownSubject)
        ));

        let weird_role = issue_token(
            &secret,
            "idp|alice",
            Some("superuser"),
            chrono::Duration::minutes(5),
        )
        .unwrap();
        assert!(matches!(
            gate.authenticate(&store, &weird_role).await,
            Err(IdentityError::UnknownRole(_))
        ));
    }

    #[tokio::test]
    async fn test_deactivated_user_is_rejected_after_forget() {
        let (gate, secret) = gate();
        let (store, user) = store_with_user(Role::Sales).await;
        let token = issue_token(&secret, "idp|alice", None, chrono::Duration::minutes(5)).unwrap();
        gate.authenticate(&store, &token).await.unwrap();

        store.deactivate_user(user.id).await.unwrap();
        gate.forget("idp|alice").await;

        assert!(matches!(
            gate.authenticate(&store, &token).await,
            Err(IdentityError::Deactivated)
        ));
    }

    #[tokio::test]
    async fn test_inactive_organization_locks_out_its_users() {
        let (gate, secret) = gate();
        let (store, user) = store_with_user(Role::Admin).await;
        let token = issue_token(&secret, "idp|alice", None, chrono::Duration::minutes(5)).unwrap();
        gate.authenticate(&store, &token).await.unwrap();

        let patch = |active| OrganizationPatch {
            name: None,
            contact_email: None,
            active: Some(active),
        };
        store.update_organization(user.org_id, patch(false)).await.unwrap();
        assert!(matches!(
            gate.authenticate(&store, &token).await,
            Err(IdentityError::OrganizationInactive)
        ));

        store.update_organization(user.org_id, patch(true)).await.unwrap();
        assert!(gate.authenticate(&store, &token).await.is_ok());
    }
}
