//! Bearer token extractor.
//!
//! Handlers that take a [`RequirePrincipal`] only run for requests whose
//! `Authorization: Bearer` token resolves to a live CRM user. Role checks are
//! left to the services.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::debug;

use crate::error::{AppError, set_sentry_user};
use crate::identity::IdentityError;
use crate::models::Principal;
use crate::state::AppState;

/// Extractor that requires an authenticated principal.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(RequirePrincipal(principal): RequirePrincipal) -> String {
///     format!("hello user {}", principal.user_id)
/// }
/// ```
pub struct RequirePrincipal(pub Principal);

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

impl FromRequestParts<AppState> for RequirePrincipal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(IdentityError::MissingCredentials)?;

        let principal = state
            .identity()
            .authenticate(state.store(), token)
            .await
            .inspect_err(|e| debug!(path = %parts.uri.path(), error = %e, "Authentication failed"))?;

        set_sentry_user(
            principal.user_id.as_i32(),
            principal.email.as_ref().map(parts_crm_core::Email::as_str),
        );
        Ok(Self(principal))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/orders");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&parts(Some("Bearer abc.def"))), Some("abc.def"));
        assert_eq!(bearer_token(&parts(Some("bearer  abc "))), Some("abc"));
        assert_eq!(bearer_token(&parts(Some("Basic dXNlcg=="))), None);
        assert_eq!(bearer_token(&parts(Some("Bearer "))), None);
        assert_eq!(bearer_token(&parts(None)), None);
    }
}
