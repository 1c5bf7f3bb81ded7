//! Domain models for the CRM.
//!
//! Every record carries the id of the organization (tenant) that owns it. The
//! [`Tenanted`] trait exposes that id so access checks can be written once.

mod directory;
mod order;
mod payment;
mod principal;
mod ticket;

pub use directory::{Organization, Product, User};
pub use order::{Order, OrderDetail, OrderProduct};
pub use payment::{SavedCard, Transaction};
pub use principal::Principal;
pub use ticket::Ticket;

use parts_crm_core::OrganizationId;

/// A record owned by exactly one organization.
pub trait Tenanted {
    /// The owning organization.
    fn org_id(&self) -> OrganizationId;
}

macro_rules! impl_tenanted {
    ($($name:ty),* $(,)?) => {
        $(
            impl Tenanted for $name {
                fn org_id(&self) -> OrganizationId {
                    self.org_id
                }
            }
        )*
    };
}

impl_tenanted!(User, Product, Order, OrderProduct, Transaction, SavedCard, Ticket);

impl Tenanted for Organization {
    fn org_id(&self) -> OrganizationId {
        self.id
    }
}
