//! Catalog, organization and staff directory.
//!
//! Reads are open to any staff member of the tenant; every mutation here is
//! admin-only.

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument};

use parts_crm_core::{Email, OrganizationId, UserId};

use super::access::{in_tenant, require_admin, require_staff};
use crate::db::{NewProduct, OrganizationPatch, RecordStore};
use crate::error::AppError;
use crate::models::{Organization, Principal, Product, SavedCard, User};

/// Product fields as submitted.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductInput {
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProductInputError {
    #[error("product name is required")]
    BlankName,
    #[error("vehicle year {0} is out of range")]
    YearOutOfRange(i32),
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ProductInput {
    /// Validate and attach to a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`ProductInputError`] for a blank name or an implausible year.
    pub fn into_new(self, org_id: OrganizationId) -> Result<NewProduct, ProductInputError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ProductInputError::BlankName);
        }
        if let Some(year) = self.year
            && !(1900..=2100).contains(&year)
        {
            return Err(ProductInputError::YearOutOfRange(year));
        }

        Ok(NewProduct {
            org_id,
            name,
            code: trimmed(self.code),
            make: trimmed(self.make),
            model: trimmed(self.model),
            year: self.year,
            description: trimmed(self.description),
        })
    }
}

/// Organization fields to change. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrganizationUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// Catalog and directory operations for one request.
pub struct CatalogService<'a, S> {
    store: &'a S,
}

impl<'a, S: RecordStore> CatalogService<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// The tenant's catalog, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the principal is not staff or the store fails.
    pub async fn products(&self, principal: &Principal) -> Result<Vec<Product>, AppError> {
        require_staff(principal)?;
        Ok(self.store.list_products(principal.org_id).await?)
    }

    /// Add a catalog product.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Forbidden`] for non-admins and
    /// [`AppError::Validation`] for bad input.
    #[instrument(skip(self, principal, input), fields(user_id = %principal.user_id))]
    pub async fn create_product(
        &self,
        principal: &Principal,
        input: ProductInput,
    ) -> Result<Product, AppError> {
        require_admin(principal, "create products")?;
        let new = input
            .into_new(principal.org_id)
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let product = self.store.create_product(new).await?;
        info!(product_id = %product.id, name = %product.name, "Product created");
        Ok(product)
    }

    /// The principal's organization.
    ///
    /// # Errors
    ///
    /// Returns an error if the principal is not staff or the store fails.
    pub async fn organization(&self, principal: &Principal) -> Result<Organization, AppError> {
        require_staff(principal)?;
        self.store
            .get_organization(principal.org_id)
            .await?
            .ok_or_else(|| AppError::not_found("organization", principal.org_id))
    }

    /// Rename, re-address or (de)activate the principal's organization.
    ///
    /// Once inactive, every user of the organization is refused at sign-in;
    /// `crm-cli org set-active` turns it back on.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Forbidden`] for non-admins and
    /// [`AppError::Validation`] for a blank name or malformed email.
    #[instrument(skip(self, principal, update), fields(user_id = %principal.user_id))]
    pub async fn update_organization(
        &self,
        principal: &Principal,
        update: OrganizationUpdate,
    ) -> Result<Organization, AppError> {
        require_admin(principal, "change the organization")?;

        let name = match update.name {
            Some(name) if name.trim().is_empty() => {
                return Err(AppError::Validation(
                    "organization name cannot be blank".to_string(),
                ));
            }
            other => other.map(|n| n.trim().to_string()),
        };
        let contact_email = update
            .contact_email
            .as_deref()
            .map(Email::parse)
            .transpose()
            .map_err(|e| AppError::Validation(format!("contact email: {e}")))?;

        let org = self
            .store
            .update_organization(
                principal.org_id,
                OrganizationPatch {
                    name,
                    contact_email,
                    active: update.active,
                },
            )
            .await?
            .ok_or_else(|| AppError::not_found("organization", principal.org_id))?;

        info!(org_id = %org.id, active = org.active, "Organization updated");
        Ok(org)
    }

    /// Every user of the tenant, deactivated ones included.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Forbidden`] for non-admins.
    pub async fn users(&self, principal: &Principal) -> Result<Vec<User>, AppError> {
        require_admin(principal, "list users")?;
        Ok(self.store.list_users(principal.org_id).await?)
    }

    /// Soft-delete a user of the tenant.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Forbidden`] for non-admins,
    /// [`AppError::Validation`] when an admin targets themself and
    /// [`AppError::NotFound`] for unknown or foreign users.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn deactivate_user(
        &self,
        principal: &Principal,
        user_id: UserId,
    ) -> Result<User, AppError> {
        require_admin(principal, "deactivate users")?;
        if principal.is(user_id) {
            return Err(AppError::Validation(
                "you cannot deactivate yourself".to_string(),
            ));
        }
        in_tenant(principal, self.store.get_user(user_id).await?, "user", user_id)?;

        let user = self
            .store
            .deactivate_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user", user_id))?;

        info!(target_user = %user_id, "User deactivated");
        Ok(user)
    }

    /// Cards kept on file for a customer. Only tokens and last four digits
    /// are ever stored.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for unknown or foreign customers.
    pub async fn saved_cards(
        &self,
        principal: &Principal,
        customer_id: UserId,
    ) -> Result<Vec<SavedCard>, AppError> {
        require_staff(principal)?;
        in_tenant(
            principal,
            self.store.get_user(customer_id).await?,
            "customer",
            customer_id,
        )?;
        Ok(self
            .store
            .list_saved_cards(principal.org_id, customer_id)
            .await?)
    }
}
