//! Business operations behind the HTTP API.
//!
//! Each service borrows the record store for the length of one request and
//! takes the authenticated [`crate::models::Principal`] on every call. Role
//! and tenant checks happen here, never in the handlers.
//!
//! - [`OrderEngine`] - intake, status axes, agent slots and the procurement gate
//! - [`TicketWorkflow`] - support tickets
//! - [`PaymentService`] - card capture and the receipt backlog
//! - [`CatalogService`] - products, the organization and its users

mod access;
mod catalog;
mod checkout;
mod orders;
#[cfg(test)]
mod testing;
mod tickets;

pub use catalog::{CatalogService, OrganizationUpdate, ProductInput, ProductInputError};
pub use checkout::{PaymentOutcome, PaymentService, ReceiptBacklog};
pub use orders::{CustomerInput, LineItemInput, OrderDraft, OrderEngine, split_name};
pub use tickets::{TicketDraft, TicketPatch, TicketWorkflow};
