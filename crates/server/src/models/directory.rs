//! Tenants, users and the product catalog.

use chrono::{DateTime, Utc};
use serde::Serialize;

use parts_crm_core::{Email, OrganizationId, ProductId, Role, UserId};

/// A tenant. Never hard-deleted.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub contact_email: Option<Email>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A CRM user: staff member or customer.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub org_id: OrganizationId,
    /// Subject id at the identity provider. Customers created inline during
    /// order intake have none until they sign up.
    pub external_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<Email>,
    pub phone: Option<String>,
    pub role: Role,
    /// Soft-delete flag.
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Display name.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }

    /// Whether this user may be named as an order agent or ticket assignee.
    #[must_use]
    pub const fn is_active_staff(&self) -> bool {
        !self.deleted && self.role.is_staff()
    }
}

/// A catalog item, scoped to one organization.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Product {
    pub id: ProductId,
    pub org_id: OrganizationId,
    pub name: String,
    pub code: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}
