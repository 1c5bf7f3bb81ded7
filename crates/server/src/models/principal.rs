//! The authenticated actor behind a request.

use serde::Serialize;

use parts_crm_core::{Email, OrganizationId, Role, UserId};

/// Output of the identity gate. Every engine operation takes one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    /// Mirrored CRM user.
    pub user_id: UserId,
    /// Tenant the user belongs to.
    pub org_id: OrganizationId,
    /// Canonical role after claim mapping.
    pub role: Role,
    /// Contact email, if known.
    pub email: Option<Email>,
}

impl Principal {
    /// Whether this principal is the given user.
    #[must_use]
    pub fn is(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}
