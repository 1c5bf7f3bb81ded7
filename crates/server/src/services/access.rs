//! Role and tenant checks shared by every service.
//!
//! A record owned by another organization is reported exactly like a missing
//! one, so the caller learns nothing about other tenants.

use std::fmt::Display;

use tracing::debug;

use parts_crm_core::UserId;

use crate::db::RecordStore;
use crate::error::AppError;
use crate::models::{Principal, Tenanted, User};

/// Reject customers and anything else that is not CRM staff.
///
/// # Errors
///
/// Returns [`AppError::Forbidden`] for non-staff principals.
pub fn require_staff(principal: &Principal) -> Result<(), AppError> {
    if principal.role.is_staff() {
        Ok(())
    } else {
        debug!(user_id = %principal.user_id, role = %principal.role, "Non-staff principal rejected");
        Err(AppError::Forbidden(
            "staff role required for CRM operations".to_string(),
        ))
    }
}

/// Reject every role except admin. `action` completes "admin role required to ...".
///
/// # Errors
///
/// Returns [`AppError::Forbidden`] for non-admin principals.
pub fn require_admin(principal: &Principal, action: &str) -> Result<(), AppError> {
    if principal.role.is_admin() {
        Ok(())
    } else {
        debug!(user_id = %principal.user_id, role = %principal.role, action, "Admin check failed");
        Err(AppError::Forbidden(format!("admin role required to {action}")))
    }
}

/// Unwrap a looked-up record, treating another tenant's record as absent.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] when the record is missing or foreign.
pub fn in_tenant<T: Tenanted>(
    principal: &Principal,
    record: Option<T>,
    what: &str,
    id: impl Display,
) -> Result<T, AppError> {
    match record {
        Some(record) if record.org_id() == principal.org_id => Ok(record),
        Some(_) => {
            debug!(org_id = %principal.org_id, what, %id, "Cross-tenant lookup hidden");
            Err(AppError::not_found(what, id))
        }
        None => Err(AppError::not_found(what, id)),
    }
}

/// Load a user who can hold an agent slot or a ticket in the principal's
/// organization.
///
/// # Errors
///
/// Returns [`AppError::Validation`] when the user is missing, foreign,
/// deactivated or a customer.
pub async fn active_staff<S: RecordStore>(
    store: &S,
    principal: &Principal,
    user_id: UserId,
) -> Result<User, AppError> {
    store
        .get_user(user_id)
        .await?
        .filter(|user| user.org_id == principal.org_id && user.is_active_staff())
        .ok_or_else(|| {
            AppError::Validation(format!(
                "user {user_id} is not an active staff member of this organization"
            ))
        })
}
