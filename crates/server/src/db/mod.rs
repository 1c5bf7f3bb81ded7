//! Record store for the CRM.
//!
//! # Backends
//!
//! - [`PgStore`] - `PostgreSQL` via `sqlx`, used in every deployed environment
//! - [`MemoryStore`] - ordered maps (`BTreeMap`) behind a lock, used for local development and tests
//!
//! Both implement [`RecordStore`]; [`Store`] picks one at startup.
//!
//! # Tables
//!
//! - `organization` - Tenants
//! - `crm_user` - Staff and customers (soft delete)
//! - `product` - Catalog, scoped per organization
//! - `customer_order` - Orders with payment/fulfillment status and agent slots
//! - `order_product` - Line item snapshots with procurement fields
//! - `payment_transaction` - Append-only capture receipts
//! - `saved_card` - Gateway tokens for cards on file
//! - `ticket` - Support tickets
//!
//! # Guarded writes
//!
//! Every status change is a compare-and-swap against the status the engine
//! validated, and the multi-row writes (order intake, capture receipts) are
//! atomic. A guarded write that loses returns `Ok(None)`; the caller re-reads
//! to explain why.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p parts-crm-cli -- migrate
//! ```

mod memory;
mod postgres;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use parts_crm_core::{
    AgentType, Email, FulfillmentStatus, OrderId, OrderProductId, OrganizationId, PaymentStatus,
    ProductId, Role, TicketId, TicketPriority, TicketStatus, UserId,
};

use crate::models::{
    Order, OrderProduct, Organization, Product, SavedCard, Ticket, Transaction, User,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Constraint violation (e.g., unique email).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// A referenced record does not exist in the writing tenant.
    #[error("missing reference: {0}")]
    MissingReference(String),
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

// =============================================================================
// Write inputs
// =============================================================================

/// Parameters for creating an organization.
#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub name: String,
    pub contact_email: Option<Email>,
}

/// Partial update of an organization. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct OrganizationPatch {
    pub name: Option<String>,
    pub contact_email: Option<Email>,
    pub active: Option<bool>,
}

/// Parameters for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub org_id: OrganizationId,
    pub external_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<Email>,
    pub phone: Option<String>,
    pub role: Role,
}

/// Parameters for creating a catalog product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub org_id: OrganizationId,
    pub name: String,
    pub code: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub description: Option<String>,
}

/// Customer details captured at order intake.
#[derive(Debug, Clone)]
pub struct CustomerSnapshot {
    pub first_name: String,
    pub last_name: String,
    pub email: Email,
    pub phone: Option<String>,
}

impl CustomerSnapshot {
    /// Name as stored on the order.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }
}

/// Product a line item points at.
#[derive(Debug, Clone)]
pub enum LineItemProduct {
    /// Catalog product that must already exist in the tenant.
    Existing(ProductId),
    /// Product created in the same unit of work as the order.
    Inline(NewProduct),
}

/// One validated line item of a new order.
#[derive(Debug, Clone)]
pub struct NewLineItem {
    pub product: LineItemProduct,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// A validated order ready to persist.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub org_id: OrganizationId,
    pub customer: CustomerSnapshot,
    pub shipping_address: String,
    pub total_amount: Decimal,
    pub discounted_amount: Option<Decimal>,
    pub sales_agent: Option<UserId>,
    pub line_items: Vec<NewLineItem>,
}

/// Filter for order listings. All set fields must match.
#[derive(Debug, Clone, Copy)]
pub struct OrderFilter {
    pub org_id: OrganizationId,
    pub processing_agent: Option<UserId>,
    pub followup_agent: Option<UserId>,
    /// Only orders with no processing agent.
    pub unclaimed: bool,
    pub fulfillment_status: Option<FulfillmentStatus>,
}

impl OrderFilter {
    /// Every order of a tenant.
    #[must_use]
    pub const fn org(org_id: OrganizationId) -> Self {
        Self {
            org_id,
            processing_agent: None,
            followup_agent: None,
            unclaimed: false,
            fulfillment_status: None,
        }
    }
}

/// Write one agent slot of an order.
#[derive(Debug, Clone, Copy)]
pub struct AgentAssignment {
    pub order_id: OrderId,
    pub slot: AgentType,
    pub agent_id: UserId,
    /// Only write when the slot is currently empty.
    pub require_unassigned: bool,
    /// When the order's fulfillment status equals `.0`, move it to `.1` in
    /// the same write. Any other status is left as is.
    pub advance_fulfillment: Option<(FulfillmentStatus, FulfillmentStatus)>,
}

/// Receipt of a successful capture, written as one unit.
#[derive(Debug, Clone)]
pub struct CaptureReceipt {
    pub org_id: OrganizationId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub payment_method: String,
    pub gateway_transaction_id: Option<String>,
    pub auth_code: Option<String>,
    pub response_code: Option<String>,
    pub metadata: serde_json::Value,
    /// Set `sales_agent` to this user if the slot is empty.
    pub stamp_sales_agent: Option<UserId>,
    pub saved_card: Option<NewSavedCard>,
}

/// Tokenized card to keep on file.
#[derive(Debug, Clone)]
pub struct NewSavedCard {
    pub customer_id: UserId,
    pub gateway_token: String,
    pub last4: String,
    pub brand: Option<String>,
}

/// Parameters for creating a ticket.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub org_id: OrganizationId,
    pub user_id: UserId,
    pub order_id: Option<OrderId>,
    pub title: String,
    pub description: String,
    pub priority: TicketPriority,
}

/// Filter for ticket listings.
#[derive(Debug, Clone, Copy)]
pub struct TicketFilter {
    pub org_id: OrganizationId,
    pub assigned_to: Option<UserId>,
}

/// The mutable fields of a ticket as they should be after a write.
#[derive(Debug, Clone, Copy)]
pub struct TicketState {
    pub status: TicketStatus,
    pub assigned_to: Option<UserId>,
    pub priority: TicketPriority,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TicketState {
    /// Current state of a stored ticket.
    #[must_use]
    pub const fn of(ticket: &Ticket) -> Self {
        Self {
            status: ticket.status,
            assigned_to: ticket.assigned_to,
            priority: ticket.priority,
            resolved_at: ticket.resolved_at,
        }
    }
}

// =============================================================================
// Store trait
// =============================================================================

/// Durable storage for every CRM record.
///
/// Lookups by id are not tenant-scoped; callers compare the returned record's
/// `org_id` with the principal's. Listings always take the tenant.
pub trait RecordStore: Send + Sync {
    /// Round-trip to the backend.
    fn ping(&self) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    // --- organizations -----------------------------------------------------

    fn create_organization(
        &self,
        new: NewOrganization,
    ) -> impl Future<Output = Result<Organization, RepositoryError>> + Send;

    fn get_organization(
        &self,
        id: OrganizationId,
    ) -> impl Future<Output = Result<Option<Organization>, RepositoryError>> + Send;

    fn update_organization(
        &self,
        id: OrganizationId,
        patch: OrganizationPatch,
    ) -> impl Future<Output = Result<Option<Organization>, RepositoryError>> + Send;

    // --- users -------------------------------------------------------------

    /// Fails with [`RepositoryError::Conflict`] when the email or external id
    /// is already taken by a live user.
    fn create_user(
        &self,
        new: NewUser,
    ) -> impl Future<Output = Result<User, RepositoryError>> + Send;

    fn get_user(
        &self,
        id: UserId,
    ) -> impl Future<Output = Result<Option<User>, RepositoryError>> + Send;

    fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> impl Future<Output = Result<Option<User>, RepositoryError>> + Send;

    fn list_users(
        &self,
        org_id: OrganizationId,
    ) -> impl Future<Output = Result<Vec<User>, RepositoryError>> + Send;

    /// Soft delete. Returns `None` if the user does not exist.
    fn deactivate_user(
        &self,
        id: UserId,
    ) -> impl Future<Output = Result<Option<User>, RepositoryError>> + Send;

    // --- products ----------------------------------------------------------

    fn create_product(
        &self,
        new: NewProduct,
    ) -> impl Future<Output = Result<Product, RepositoryError>> + Send;

    fn list_products(
        &self,
        org_id: OrganizationId,
    ) -> impl Future<Output = Result<Vec<Product>, RepositoryError>> + Send;

    // --- orders ------------------------------------------------------------

    /// Resolve or create the customer, create inline products, then insert the
    /// order and its line items. All or nothing: a missing or foreign product
    /// fails with [`RepositoryError::MissingReference`] and writes nothing.
    fn create_order(
        &self,
        new: NewOrder,
    ) -> impl Future<Output = Result<(Order, Vec<OrderProduct>), RepositoryError>> + Send;

    fn get_order(
        &self,
        id: OrderId,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    /// Newest first.
    fn list_orders(
        &self,
        filter: OrderFilter,
    ) -> impl Future<Output = Result<Vec<Order>, RepositoryError>> + Send;

    fn list_order_products(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Vec<OrderProduct>, RepositoryError>> + Send;

    fn get_order_product(
        &self,
        id: OrderProductId,
    ) -> impl Future<Output = Result<Option<OrderProduct>, RepositoryError>> + Send;

    /// Write `to` only if the payment status is still `expected`.
    fn set_payment_status(
        &self,
        id: OrderId,
        expected: PaymentStatus,
        to: PaymentStatus,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    /// Write `to` only if the fulfillment status is still `expected`.
    fn set_fulfillment_status(
        &self,
        id: OrderId,
        expected: FulfillmentStatus,
        to: FulfillmentStatus,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    /// Move the order to `shipped` only if its status is still `expected` and
    /// every line item has both procurement fields.
    fn ship_if_procured(
        &self,
        id: OrderId,
        expected: FulfillmentStatus,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    fn set_order_tracking(
        &self,
        id: OrderId,
        tracking: String,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    fn assign_agent(
        &self,
        assignment: AgentAssignment,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    /// Record procurement on a line item. With `only_if_unset` the write only
    /// happens while at least one of the two fields is still empty.
    fn set_procurement(
        &self,
        id: OrderProductId,
        cost: Decimal,
        source: String,
        only_if_unset: bool,
    ) -> impl Future<Output = Result<Option<OrderProduct>, RepositoryError>> + Send;

    // --- payments ----------------------------------------------------------

    /// Insert the transaction, mark the order paid, stamp the sales agent and
    /// keep the card token, all in one unit. A `refunded` order keeps its
    /// status.
    fn record_capture(
        &self,
        receipt: CaptureReceipt,
    ) -> impl Future<Output = Result<Transaction, RepositoryError>> + Send;

    /// Oldest first.
    fn list_transactions(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Vec<Transaction>, RepositoryError>> + Send;

    fn list_saved_cards(
        &self,
        org_id: OrganizationId,
        customer_id: UserId,
    ) -> impl Future<Output = Result<Vec<SavedCard>, RepositoryError>> + Send;

    // --- tickets -----------------------------------------------------------

    fn create_ticket(
        &self,
        new: NewTicket,
    ) -> impl Future<Output = Result<Ticket, RepositoryError>> + Send;

    fn get_ticket(
        &self,
        id: TicketId,
    ) -> impl Future<Output = Result<Option<Ticket>, RepositoryError>> + Send;

    /// Newest first.
    fn list_tickets(
        &self,
        filter: TicketFilter,
    ) -> impl Future<Output = Result<Vec<Ticket>, RepositoryError>> + Send;

    /// Take an open, unassigned ticket: `assigned_to = user`, `in_progress`.
    fn claim_ticket(
        &self,
        id: TicketId,
        user_id: UserId,
    ) -> impl Future<Output = Result<Option<Ticket>, RepositoryError>> + Send;

    /// Replace the mutable fields only if status and assignee still match
    /// `expected`.
    fn set_ticket_state(
        &self,
        id: TicketId,
        expected: TicketState,
        next: TicketState,
    ) -> impl Future<Output = Result<Option<Ticket>, RepositoryError>> + Send;
}

// =============================================================================
// Backend selection
// =============================================================================

/// The configured backend.
#[derive(Debug, Clone)]
pub enum Store {
    Postgres(PgStore),
    Memory(MemoryStore),
}

impl Store {
    /// Short backend name for logs.
    #[must_use]
    pub const fn backend(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Memory(_) => "memory",
        }
    }
}

macro_rules! delegate {
    ($self:ident . $method:ident ( $($arg:expr),* )) => {
        match $self {
            Store::Postgres(store) => store.$method($($arg),*).await,
            Store::Memory(store) => store.$method($($arg),*).await,
        }
    };
}

impl RecordStore for Store {
    async fn ping(&self) -> Result<(), RepositoryError> {
        delegate!(self.ping())
    }

    async fn create_organization(
        &self,
        new: NewOrganization,
    ) -> Result<Organization, RepositoryError> {
        delegate!(self.create_organization(new))
    }

    async fn get_organization(
        &self,
        id: OrganizationId,
    ) -> Result<Option<Organization>, RepositoryError> {
        delegate!(self.get_organization(id))
    }

    async fn update_organization(
        &self,
        id: OrganizationId,
        patch: OrganizationPatch,
    ) -> Result<Option<Organization>, RepositoryError> {
        delegate!(self.update_organization(id, patch))
    }

    async fn create_user(&self, new: NewUser) -> Result<User, RepositoryError> {
        delegate!(self.create_user(new))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        delegate!(self.get_user(id))
    }

    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        delegate!(self.find_user_by_external_id(external_id))
    }

    async fn list_users(&self, org_id: OrganizationId) -> Result<Vec<User>, RepositoryError> {
        delegate!(self.list_users(org_id))
    }

    async fn deactivate_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        delegate!(self.deactivate_user(id))
    }

    async fn create_product(&self, new: NewProduct) -> Result<Product, RepositoryError> {
        delegate!(self.create_product(new))
    }

    async fn list_products(
        &self,
        org_id: OrganizationId,
    ) -> Result<Vec<Product>, RepositoryError> {
        delegate!(self.list_products(org_id))
    }

    async fn create_order(
        &self,
        new: NewOrder,
    ) -> Result<(Order, Vec<OrderProduct>), RepositoryError> {
        delegate!(self.create_order(new))
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        delegate!(self.get_order(id))
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        delegate!(self.list_orders(filter))
    }

    async fn list_order_products(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<OrderProduct>, RepositoryError> {
        delegate!(self.list_order_products(order_id))
    }

    async fn get_order_product(
        &self,
        id: OrderProductId,
    ) -> Result<Option<OrderProduct>, RepositoryError> {
        delegate!(self.get_order_product(id))
    }

    async fn set_payment_status(
        &self,
        id: OrderId,
        expected: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        delegate!(self.set_payment_status(id, expected, to))
    }

    async fn set_fulfillment_status(
        &self,
        id: OrderId,
        expected: FulfillmentStatus,
        to: FulfillmentStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        delegate!(self.set_fulfillment_status(id, expected, to))
    }

    async fn ship_if_procured(
        &self,
        id: OrderId,
        expected: FulfillmentStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        delegate!(self.ship_if_procured(id, expected))
    }

    async fn set_order_tracking(
        &self,
        id: OrderId,
        tracking: String,
    ) -> Result<Option<Order>, RepositoryError> {
        delegate!(self.set_order_tracking(id, tracking))
    }

    async fn assign_agent(
        &self,
        assignment: AgentAssignment,
    ) -> Result<Option<Order>, RepositoryError> {
        delegate!(self.assign_agent(assignment))
    }

    async fn set_procurement(
        &self,
        id: OrderProductId,
        cost: Decimal,
        source: String,
        only_if_unset: bool,
    ) -> Result<Option<OrderProduct>, RepositoryError> {
        delegate!(self.set_procurement(id, cost, source, only_if_unset))
    }

    async fn record_capture(&self, receipt: CaptureReceipt) -> Result<Transaction, RepositoryError> {
        delegate!(self.record_capture(receipt))
    }

    async fn list_transactions(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        delegate!(self.list_transactions(order_id))
    }

    async fn list_saved_cards(
        &self,
        org_id: OrganizationId,
        customer_id: UserId,
    ) -> Result<Vec<SavedCard>, RepositoryError> {
        delegate!(self.list_saved_cards(org_id, customer_id))
    }

    async fn create_ticket(&self, new: NewTicket) -> Result<Ticket, RepositoryError> {
        delegate!(self.create_ticket(new))
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>, RepositoryError> {
        delegate!(self.get_ticket(id))
    }

    async fn list_tickets(&self, filter: TicketFilter) -> Result<Vec<Ticket>, RepositoryError> {
        delegate!(self.list_tickets(filter))
    }

    async fn claim_ticket(
        &self,
        id: TicketId,
        user_id: UserId,
    ) -> Result<Option<Ticket>, RepositoryError> {
        delegate!(self.claim_ticket(id, user_id))
    }

    async fn set_ticket_state(
        &self,
        id: TicketId,
        expected: TicketState,
        next: TicketState,
    ) -> Result<Option<Ticket>, RepositoryError> {
        delegate!(self.set_ticket_state(id, expected, next))
    }
}
