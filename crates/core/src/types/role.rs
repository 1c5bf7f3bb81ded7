//! Principal roles and order agent slots.
//!
//! Identity providers have used two vocabularies over time
//! (`admin`/`sales`/... and `ADMIN`/`SALES_AGENT`/...). Both are mapped onto the
//! single [`Role`] enum by [`Role::from_claim`]; nothing past the identity gate
//! ever sees a raw role string.

use serde::{Deserialize, Serialize};

/// The role of a CRM principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "crm_role", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Manager: may assign any agent, mutate the catalog and the organization.
    Admin,
    /// Takes orders and captures payments.
    Sales,
    /// Claims orders from the processing queue and records procurement.
    Processing,
    /// Handles post-delivery follow-up and support tickets.
    Followup,
    /// End customer. Authenticated but never allowed to act on CRM records.
    Customer,
}

/// A role claim did not match either provider vocabulary.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid role: {0}")]
pub struct RoleParseError(pub String);

impl Role {
    /// Map an identity-provider role claim onto a canonical role.
    ///
    /// Accepts the canonical snake_case names as well as the legacy
    /// `SCREAMING_SNAKE_CASE` agent vocabulary. `EMPLOYEE` maps to [`Role::Sales`].
    ///
    /// # Errors
    ///
    /// Returns [`RoleParseError`] for any other value.
    pub fn from_claim(claim: &str) -> Result<Self, RoleParseError> {
        match claim.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Self::Admin),
            "SALES" | "SALES_AGENT" | "EMPLOYEE" => Ok(Self::Sales),
            "PROCESSING" | "PROCESSING_AGENT" => Ok(Self::Processing),
            "FOLLOWUP" | "FOLLOWUP_AGENT" => Ok(Self::Followup),
            "CUSTOMER" => Ok(Self::Customer),
            _ => Err(RoleParseError(claim.to_owned())),
        }
    }

    /// Whether this role may act on CRM records at all.
    #[must_use]
    pub const fn is_staff(self) -> bool {
        !matches!(self, Self::Customer)
    }

    /// Whether this role has managerial rights.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Whether a principal with this role becomes the sales agent of orders it
    /// creates or payments it captures.
    #[must_use]
    pub const fn is_sales_capable(self) -> bool {
        matches!(self, Self::Admin | Self::Sales)
    }

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Sales => "sales",
            Self::Processing => "processing",
            Self::Followup => "followup",
            Self::Customer => "customer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_claim(s)
    }
}

/// Which agent slot on an order is being assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// `sales_agent`
    Sales,
    /// `processing_agent`
    Processing,
    /// `followup_agent`
    Followup,
}

impl AgentType {
    /// Column-style name of the slot.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Processing => "processing",
            Self::Followup => "followup",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
